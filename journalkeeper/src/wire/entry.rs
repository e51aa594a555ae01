//! Codec for journal entries and cluster configurations.
//!
//! The same record layout is used on the wire (AppendEntries batches)
//! and on disk (segment records), so a replicated entry is bit-identical
//! to the persisted one.

use super::codec::*;
use crate::process::{Clock, ClusterConfig, Entry};
use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};

pub fn put_clock(buf: &mut BytesMut, c: &Clock) {
    buf.put_u64(c.term);
    buf.put_u64(c.index);
}

pub fn get_clock(buf: &mut Bytes) -> Result<Clock, Error> {
    Ok(Clock {
        term: get_u64(buf)?,
        index: get_u64(buf)?,
    })
}

pub fn put_entry(buf: &mut BytesMut, e: &Entry) {
    put_clock(buf, &e.this_clock);
    buf.put_u16(e.partition);
    buf.put_u16(e.batch_size);
    buf.put_i64(e.timestamp);
    put_option(buf, &e.header, |b, h| put_bytes(b, h));
    put_bytes(buf, &e.payload);
}

pub fn get_entry(buf: &mut Bytes) -> Result<Entry, Error> {
    Ok(Entry {
        this_clock: get_clock(buf)?,
        partition: get_u16(buf)?,
        batch_size: get_u16(buf)?,
        timestamp: get_i64(buf)?,
        header: get_option(buf, get_bytes)?,
        payload: get_bytes(buf)?,
    })
}

/// Strict single-record decode used by the journal store.
pub fn entry_from_bytes(mut buf: Bytes) -> Result<Entry, Error> {
    let e = get_entry(&mut buf)?;
    if !buf.is_empty() {
        return Err(Error::MalformedFrame);
    }
    Ok(e)
}

pub fn entry_to_bytes(e: &Entry) -> Bytes {
    let mut buf = BytesMut::new();
    put_entry(&mut buf, e);
    buf.freeze()
}

fn put_node_set(
    buf: &mut BytesMut,
    set: &std::collections::HashSet<crate::NodeId>,
) {
    // Encoded in sorted order so equal configurations encode equally.
    let mut ids: Vec<_> = set.iter().cloned().collect();
    ids.sort();
    buf.put_u32(ids.len() as u32);
    for id in ids {
        put_node_id(buf, &id);
    }
}

fn get_node_set(buf: &mut Bytes) -> Result<std::collections::HashSet<crate::NodeId>, Error> {
    let n = get_u32(buf)? as usize;
    let mut out = std::collections::HashSet::new();
    for _ in 0..n {
        out.insert(get_node_id(buf)?);
    }
    Ok(out)
}

pub fn put_config(buf: &mut BytesMut, c: &ClusterConfig) {
    put_node_set(buf, &c.voters);
    match &c.old_voters {
        Some(old) => {
            buf.put_u8(1);
            put_node_set(buf, old);
        }
        None => buf.put_u8(0),
    }
    put_node_set(buf, &c.observers);
}

pub fn get_config(buf: &mut Bytes) -> Result<ClusterConfig, Error> {
    let voters = get_node_set(buf)?;
    let old_voters = if get_bool(buf)? {
        Some(get_node_set(buf)?)
    } else {
        None
    };
    let observers = get_node_set(buf)?;
    Ok(ClusterConfig {
        voters,
        old_voters,
        observers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_entry() -> Entry {
        Entry {
            this_clock: Clock { term: 7, index: 21 },
            partition: 3,
            batch_size: 2,
            timestamp: 1_700_000_000_000,
            header: Some(Bytes::from_static(b"hdr")),
            payload: Bytes::from_static(b"payload"),
        }
    }

    #[test]
    fn entry_round_trip() {
        let e = some_entry();
        let bin = entry_to_bytes(&e);
        assert_eq!(entry_from_bytes(bin).unwrap(), e);
    }

    #[test]
    fn entry_rejects_trailing_bytes() {
        let mut bin = BytesMut::from(&entry_to_bytes(&some_entry())[..]);
        bin.put_u8(0);
        assert!(matches!(
            entry_from_bytes(bin.freeze()),
            Err(Error::MalformedFrame)
        ));
    }

    #[test]
    fn config_round_trip() {
        let config = ClusterConfig {
            voters: ["127.0.0.1:1".parse().unwrap(), "127.0.0.1:2".parse().unwrap()]
                .into_iter()
                .collect(),
            old_voters: Some(["127.0.0.1:3".parse().unwrap()].into_iter().collect()),
            observers: ["127.0.0.1:4".parse().unwrap()].into_iter().collect(),
        };
        let mut buf = BytesMut::new();
        put_config(&mut buf, &config);
        let mut b = buf.freeze();
        assert_eq!(get_config(&mut b).unwrap(), config);
        assert!(b.is_empty());
    }
}
