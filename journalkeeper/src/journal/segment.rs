//! Segmented on-disk journal.
//!
//! Layout under the root directory:
//!
//! ```text
//! journal/<first-index, 20 digits>   segment files
//! ballot                             voter record, fsynced per mutation
//! meta                               snapshot boundary + committed config
//! ```
//!
//! A segment starts with a 24-byte header `{first_index, first_term,
//! created_at}` followed by length-prefixed entry records (the same record
//! layout as the wire). Every append is fsynced before it returns. A torn
//! tail record left by a crash is dropped at open.

use crate::process::{
    unix_millis, Ballot, BallotStore, Clock, ClusterConfig, Entry, Index, JournalStore, Term,
};
use crate::wire::{codec, entry as entry_codec};
use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

const SEGMENT_HEADER_LEN: u64 = 24;
const DEFAULT_SEGMENT_BYTES: u64 = 4 << 20;

fn segment_file_name(first_index: Index) -> String {
    format!("{:020}", first_index)
}

fn parse_segment_file_name(path: &Path) -> Option<Index> {
    path.file_name()?.to_str()?.parse().ok()
}

struct Segment {
    first_index: Index,
    path: PathBuf,
    /// Byte offset of the record holding `first_index + k`.
    offsets: Vec<u64>,
    len: u64,
}

impl Segment {
    fn last_index(&self) -> Index {
        self.first_index + self.offsets.len() as Index - 1
    }
}

struct Repr {
    segments: BTreeMap<Index, Segment>,
    writer: Option<tokio::fs::File>,
}

pub struct FileJournal {
    root: PathBuf,
    segment_bytes: u64,
    repr: tokio::sync::Mutex<Repr>,
}

impl FileJournal {
    fn journal_dir(root: &Path) -> PathBuf {
        root.join("journal")
    }

    pub fn destroy(root: &Path) -> Result<()> {
        std::fs::remove_dir_all(root).ok();
        Ok(())
    }

    pub fn create(root: &Path) -> Result<()> {
        std::fs::create_dir_all(root)?;
        std::fs::create_dir_all(Self::journal_dir(root))?;
        Ok(())
    }

    pub async fn open(root: &Path) -> Result<Self> {
        Self::open_with_segment_bytes(root, DEFAULT_SEGMENT_BYTES).await
    }

    pub async fn open_with_segment_bytes(root: &Path, segment_bytes: u64) -> Result<Self> {
        let mut segments = BTreeMap::new();
        let mut dir = tokio::fs::read_dir(Self::journal_dir(root))
            .await
            .context("journal directory missing")?;
        while let Some(f) = dir.next_entry().await? {
            let Some(first_index) = parse_segment_file_name(&f.path()) else {
                continue;
            };
            let seg = Self::scan_segment(first_index, f.path()).await?;
            // An empty segment carries no entry; a crash can leave one behind.
            if seg.offsets.is_empty() {
                tokio::fs::remove_file(&seg.path).await?;
                continue;
            }
            segments.insert(first_index, seg);
        }
        Ok(Self {
            root: root.to_owned(),
            segment_bytes,
            repr: tokio::sync::Mutex::new(Repr {
                segments,
                writer: None,
            }),
        })
    }

    /// Build the in-memory record index of one segment, dropping a torn
    /// tail if the process died mid-write.
    async fn scan_segment(first_index: Index, path: PathBuf) -> Result<Segment> {
        let raw = tokio::fs::read(&path).await?;
        let mut buf = Bytes::from(raw);
        anyhow::ensure!(
            buf.remaining() >= SEGMENT_HEADER_LEN as usize,
            crate::Error::StorageFault(format!("segment {:?} shorter than its header", path))
        );
        let header_first = buf.get_u64();
        let _first_term = buf.get_u64();
        let _created_at = buf.get_i64();
        anyhow::ensure!(
            header_first == first_index,
            crate::Error::StorageFault(format!("segment {:?} header mismatch", path))
        );

        let mut offsets = vec![];
        let mut pos = SEGMENT_HEADER_LEN;
        loop {
            if buf.remaining() < 4 {
                break;
            }
            let record_len = (&buf[..4]).get_u32() as usize;
            if buf.remaining() < 4 + record_len {
                break;
            }
            let mut record = buf.slice(4..4 + record_len);
            let expect_index = first_index + offsets.len() as Index;
            match entry_codec::get_entry(&mut record) {
                Ok(e) if record.is_empty() && e.this_clock.index == expect_index => {}
                _ => break,
            }
            offsets.push(pos);
            pos += 4 + record_len as u64;
            buf.advance(4 + record_len);
        }

        if buf.remaining() > 0 {
            warn!("dropping torn tail of segment {:?} at offset {}", path, pos);
            let f = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
            f.set_len(pos).await?;
            f.sync_all().await?;
        }

        Ok(Segment {
            first_index,
            path,
            offsets,
            len: pos,
        })
    }

    async fn start_segment(&self, repr: &mut Repr, first: &Entry) -> Result<()> {
        let path = Self::journal_dir(&self.root).join(segment_file_name(first.this_clock.index));
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .await?;
        let mut buf = BytesMut::new();
        buf.put_u64(first.this_clock.index);
        buf.put_u64(first.this_clock.term);
        buf.put_i64(unix_millis());
        f.write_all(&buf).await?;
        repr.segments.insert(
            first.this_clock.index,
            Segment {
                first_index: first.this_clock.index,
                path,
                offsets: vec![],
                len: SEGMENT_HEADER_LEN,
            },
        );
        repr.writer = Some(f);
        Ok(())
    }

    async fn open_writer(&self, repr: &mut Repr) -> Result<()> {
        if repr.writer.is_some() {
            return Ok(());
        }
        let Some(seg) = repr.segments.values().next_back() else {
            return Ok(());
        };
        let mut f = tokio::fs::OpenOptions::new().write(true).open(&seg.path).await?;
        f.seek(SeekFrom::Start(seg.len)).await?;
        repr.writer = Some(f);
        Ok(())
    }

    async fn read_record(seg: &Segment, i: Index) -> Result<Entry> {
        let k = (i - seg.first_index) as usize;
        let offset = seg.offsets[k];
        let mut f = tokio::fs::File::open(&seg.path).await?;
        f.seek(SeekFrom::Start(offset)).await?;
        let record_len = f.read_u32().await? as usize;
        let mut raw = vec![0u8; record_len];
        f.read_exact(&mut raw).await?;
        let e = entry_codec::entry_from_bytes(raw.into())
            .map_err(|_| crate::Error::StorageFault(format!("corrupt record at index {}", i)))?;
        Ok(e)
    }

    fn meta_path(&self) -> PathBuf {
        self.root.join("meta")
    }
}

async fn write_atomically(path: &Path, bin: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut f = tokio::fs::File::create(&tmp).await?;
    f.write_all(bin).await?;
    f.sync_all().await?;
    drop(f);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait::async_trait]
impl JournalStore for FileJournal {
    async fn append_entry(&self, e: Entry) -> Result<()> {
        let mut repr = self.repr.lock().await;

        let last = repr
            .segments
            .values()
            .next_back()
            .map(|s| s.last_index())
            .unwrap_or(0);
        anyhow::ensure!(
            last == 0 || e.this_clock.index == last + 1,
            crate::Error::LogStateError
        );

        let roll = match repr.segments.values().next_back() {
            None => true,
            Some(seg) => seg.len >= self.segment_bytes,
        };
        if roll {
            repr.writer = None;
            self.start_segment(&mut repr, &e).await?;
        } else {
            self.open_writer(&mut repr).await?;
        }

        let record = entry_codec::entry_to_bytes(&e);
        let mut buf = BytesMut::new();
        buf.put_u32(record.len() as u32);
        buf.extend_from_slice(&record);

        let writer = repr.writer.as_mut().context("no active segment")?;
        writer.write_all(&buf).await?;
        writer.sync_data().await?;

        let seg = repr.segments.values_mut().next_back().context("no segment")?;
        seg.offsets.push(seg.len);
        seg.len += buf.len() as u64;
        Ok(())
    }

    async fn insert_boundary(&self, e: Entry) -> Result<()> {
        let mut repr = self.repr.lock().await;
        repr.writer = None;
        let old: Vec<PathBuf> = repr.segments.values().map(|s| s.path.clone()).collect();
        repr.segments.clear();
        for path in old {
            tokio::fs::remove_file(path).await?;
        }
        self.start_segment(&mut repr, &e).await?;

        let record = entry_codec::entry_to_bytes(&e);
        let mut buf = BytesMut::new();
        buf.put_u32(record.len() as u32);
        buf.extend_from_slice(&record);
        let writer = repr.writer.as_mut().context("no active segment")?;
        writer.write_all(&buf).await?;
        writer.sync_all().await?;

        let seg = repr.segments.values_mut().next_back().context("no segment")?;
        seg.offsets.push(seg.len);
        seg.len += buf.len() as u64;
        Ok(())
    }

    async fn get_entry(&self, i: Index) -> Result<Option<Entry>> {
        let repr = self.repr.lock().await;
        let Some((_, seg)) = repr.segments.range(..=i).next_back() else {
            return Ok(None);
        };
        if i > seg.last_index() {
            return Ok(None);
        }
        let e = Self::read_record(seg, i).await?;
        Ok(Some(e))
    }

    async fn head_index(&self) -> Result<Index> {
        let repr = self.repr.lock().await;
        Ok(repr.segments.keys().next().copied().unwrap_or(0))
    }

    async fn last_index(&self) -> Result<Index> {
        let repr = self.repr.lock().await;
        Ok(repr
            .segments
            .values()
            .next_back()
            .map(|s| s.last_index())
            .unwrap_or(0))
    }

    async fn truncate_after(&self, i: Index) -> Result<()> {
        let mut repr = self.repr.lock().await;
        repr.writer = None;

        let drop_whole: Vec<Index> = repr
            .segments
            .range(i + 1..)
            .map(|(k, _)| *k)
            .collect();
        for k in drop_whole {
            let seg = repr.segments.remove(&k).context("segment vanished")?;
            tokio::fs::remove_file(seg.path).await?;
        }

        if let Some((_, seg)) = repr.segments.range_mut(..=i).next_back() {
            if seg.last_index() > i {
                let keep = (i - seg.first_index + 1) as usize;
                let new_len = seg.offsets[keep];
                seg.offsets.truncate(keep);
                seg.len = new_len;
                let f = tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(&seg.path)
                    .await?;
                f.set_len(new_len).await?;
                f.sync_all().await?;
            }
        }
        Ok(())
    }

    async fn compact_before(&self, i: Index) -> Result<()> {
        let mut repr = self.repr.lock().await;
        let drop_whole: Vec<Index> = repr
            .segments
            .values()
            .filter(|s| s.last_index() < i)
            .map(|s| s.first_index)
            .collect();
        for k in drop_whole {
            // Never drop the active tail segment.
            if repr.segments.len() == 1 {
                break;
            }
            let seg = repr.segments.remove(&k).context("segment vanished")?;
            tokio::fs::remove_file(seg.path).await?;
        }
        Ok(())
    }

    async fn save_snapshot_meta(&self, clock: Clock, config: ClusterConfig) -> Result<()> {
        let mut buf = BytesMut::new();
        entry_codec::put_clock(&mut buf, &clock);
        entry_codec::put_config(&mut buf, &config);
        write_atomically(&self.meta_path(), &buf).await?;
        Ok(())
    }

    async fn load_snapshot_meta(&self) -> Result<Option<(Clock, ClusterConfig)>> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read(&path).await?;
        let mut buf = Bytes::from(raw);
        let clock = entry_codec::get_clock(&mut buf)
            .map_err(|_| crate::Error::StorageFault("corrupt meta file".to_owned()))?;
        let config = entry_codec::get_config(&mut buf)
            .map_err(|_| crate::Error::StorageFault("corrupt meta file".to_owned()))?;
        Ok(Some((clock, config)))
    }
}

pub struct FileBallot {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileBallot {
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_owned(),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn ballot_path(&self) -> PathBuf {
        self.root.join("ballot")
    }
}

#[async_trait::async_trait]
impl BallotStore for FileBallot {
    async fn save_ballot(&self, v: Ballot) -> Result<()> {
        let _g = self.write_lock.lock().await;
        let mut buf = BytesMut::new();
        buf.put_u64(v.cur_term);
        codec::put_option(&mut buf, &v.voted_for, |b, id| codec::put_node_id(b, id));
        write_atomically(&self.ballot_path(), &buf).await?;
        Ok(())
    }

    async fn load_ballot(&self) -> Result<Ballot> {
        let path = self.ballot_path();
        if !path.exists() {
            return Ok(Ballot::new());
        }
        let raw = tokio::fs::read(&path).await?;
        let mut buf = Bytes::from(raw);
        let cur_term = codec::get_u64(&mut buf)
            .map_err(|_| crate::Error::StorageFault("corrupt ballot file".to_owned()))?;
        let voted_for = codec::get_option(&mut buf, codec::get_node_id)
            .map_err(|_| crate::Error::StorageFault("corrupt ballot file".to_owned()))?;
        Ok(Ballot {
            cur_term,
            voted_for,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_at(term: Term, index: Index, payload: &'static [u8]) -> Entry {
        Entry {
            this_clock: Clock { term, index },
            partition: 0,
            batch_size: 1,
            timestamp: 0,
            header: None,
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn append_read_truncate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        FileJournal::create(dir.path())?;
        let j = FileJournal::open(dir.path()).await?;

        for i in 1..=5 {
            j.append_entry(entry_at(1, i, b"x")).await?;
        }
        assert_eq!(j.head_index().await?, 1);
        assert_eq!(j.last_index().await?, 5);
        assert_eq!(j.get_entry(3).await?.unwrap().this_clock.index, 3);

        j.truncate_after(3).await?;
        assert!(j.get_entry(3).await?.is_some());
        assert!(j.get_entry(4).await?.is_none());
        assert_eq!(j.last_index().await?, 3);

        // appends continue after the truncation point
        j.append_entry(entry_at(2, 4, b"y")).await?;
        assert_eq!(j.get_entry(4).await?.unwrap().this_clock.term, 2);
        Ok(())
    }

    #[tokio::test]
    async fn survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        FileJournal::create(dir.path())?;
        {
            let j = FileJournal::open(dir.path()).await?;
            for i in 1..=10 {
                j.append_entry(entry_at(1, i, b"abcabc")).await?;
            }
        }
        let j = FileJournal::open(dir.path()).await?;
        assert_eq!(j.last_index().await?, 10);
        assert_eq!(j.get_entry(7).await?.unwrap().payload, Bytes::from_static(b"abcabc"));
        Ok(())
    }

    #[tokio::test]
    async fn rolls_segments_and_compacts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        FileJournal::create(dir.path())?;
        // tiny segments so every entry rolls a new file
        let j = FileJournal::open_with_segment_bytes(dir.path(), 1).await?;
        for i in 1..=6 {
            j.append_entry(entry_at(1, i, b"z")).await?;
        }
        j.compact_before(4).await?;
        assert_eq!(j.head_index().await?, 4);
        assert!(j.get_entry(3).await?.is_none());
        assert!(j.get_entry(4).await?.is_some());
        assert_eq!(j.last_index().await?, 6);
        Ok(())
    }

    #[tokio::test]
    async fn drops_torn_tail() -> Result<()> {
        let dir = tempfile::tempdir()?;
        FileJournal::create(dir.path())?;
        {
            let j = FileJournal::open(dir.path()).await?;
            for i in 1..=3 {
                j.append_entry(entry_at(1, i, b"q")).await?;
            }
        }
        // simulate a crash mid-record
        let seg_path = FileJournal::journal_dir(dir.path()).join(segment_file_name(1));
        let mut raw = std::fs::read(&seg_path)?;
        raw.extend_from_slice(&[0, 0, 0, 99, 1, 2, 3]);
        std::fs::write(&seg_path, raw)?;

        let j = FileJournal::open(dir.path()).await?;
        assert_eq!(j.last_index().await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn ballot_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let b = FileBallot::open(dir.path())?;
        assert_eq!(b.load_ballot().await?, Ballot::new());

        let v = Ballot {
            cur_term: 9,
            voted_for: Some("127.0.0.1:5000".parse().unwrap()),
        };
        b.save_ballot(v.clone()).await?;
        assert_eq!(b.load_ballot().await?, v);
        Ok(())
    }

    #[tokio::test]
    async fn boundary_resets_journal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        FileJournal::create(dir.path())?;
        let j = FileJournal::open(dir.path()).await?;
        for i in 1..=5 {
            j.append_entry(entry_at(1, i, b"x")).await?;
        }
        j.insert_boundary(entry_at(3, 9, b"boundary")).await?;
        assert_eq!(j.head_index().await?, 9);
        assert_eq!(j.last_index().await?, 9);
        assert!(j.get_entry(5).await?.is_none());
        j.append_entry(entry_at(3, 10, b"next")).await?;
        assert_eq!(j.last_index().await?, 10);
        Ok(())
    }
}
