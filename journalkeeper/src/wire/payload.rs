//! Per-type payload codecs. Each codec is symmetric with its encoder and
//! strict: short reads and trailing bytes fail with `MalformedFrame`.
//!
//! Every response payload starts with a status byte. A non-OK status is
//! followed by an optional leader hint and nothing else; decoding such a
//! payload yields the corresponding protocol error.

use super::codec::*;
use super::entry::*;
use super::{error_to_status, rpc_type, status, status_to_error, Payload};
use crate::process::{request, response, Consistency, ResponseLevel, Roll, UpdateRequest};
use crate::{ClusterEvent, Error};
use bytes::{BufMut, Bytes, BytesMut};

fn put_ok(buf: &mut BytesMut) {
    buf.put_u8(status::OK);
}

fn check_status(buf: &mut Bytes) -> Result<(), Error> {
    let code = get_u8(buf)?;
    if code == status::OK {
        return Ok(());
    }
    let hint = get_option(buf, get_string)?;
    Err(status_to_error(code, hint))
}

/// Payload of an error reply for any response type.
pub fn error_payload(e: &Error) -> Bytes {
    let (code, hint) = error_to_status(e);
    let mut buf = BytesMut::new();
    buf.put_u8(code);
    put_option(&mut buf, &hint, |b, s| put_string(b, s));
    buf.freeze()
}

fn put_response_level(buf: &mut BytesMut, v: ResponseLevel) {
    let code = match v {
        ResponseLevel::Receive => 0u8,
        ResponseLevel::Persistence => 1,
        ResponseLevel::Replication => 2,
        ResponseLevel::All => 3,
    };
    buf.put_u8(code);
}

fn get_response_level(buf: &mut Bytes) -> Result<ResponseLevel, Error> {
    match get_u8(buf)? {
        0 => Ok(ResponseLevel::Receive),
        1 => Ok(ResponseLevel::Persistence),
        2 => Ok(ResponseLevel::Replication),
        3 => Ok(ResponseLevel::All),
        _ => Err(Error::MalformedFrame),
    }
}

fn put_roll(buf: &mut BytesMut, v: Roll) {
    let code = match v {
        Roll::Leader => 0u8,
        Roll::Candidate => 1,
        Roll::Follower => 2,
        Roll::Observer => 3,
    };
    buf.put_u8(code);
}

fn get_roll(buf: &mut Bytes) -> Result<Roll, Error> {
    match get_u8(buf)? {
        0 => Ok(Roll::Leader),
        1 => Ok(Roll::Candidate),
        2 => Ok(Roll::Follower),
        3 => Ok(Roll::Observer),
        _ => Err(Error::MalformedFrame),
    }
}

fn put_node_list(buf: &mut BytesMut, ids: &[crate::NodeId]) {
    buf.put_u32(ids.len() as u32);
    for id in ids {
        put_node_id(buf, id);
    }
}

fn get_node_list(buf: &mut Bytes) -> Result<Vec<crate::NodeId>, Error> {
    let n = get_u32(buf)? as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(get_node_id(buf)?);
    }
    Ok(out)
}

fn put_event(buf: &mut BytesMut, ev: &ClusterEvent) {
    match ev {
        ClusterEvent::LeaderChanged { leader, term } => {
            buf.put_u8(0);
            put_option(buf, leader, |b, id| put_node_id(b, id));
            buf.put_u64(*term);
        }
        ClusterEvent::ConfigurationChanged { voters, observers } => {
            buf.put_u8(1);
            put_node_list(buf, voters);
            put_node_list(buf, observers);
        }
        ClusterEvent::WriteGateChanged { disabled } => {
            buf.put_u8(2);
            put_bool(buf, *disabled);
        }
    }
}

fn get_event(buf: &mut Bytes) -> Result<ClusterEvent, Error> {
    match get_u8(buf)? {
        0 => Ok(ClusterEvent::LeaderChanged {
            leader: get_option(buf, get_node_id)?,
            term: get_u64(buf)?,
        }),
        1 => Ok(ClusterEvent::ConfigurationChanged {
            voters: get_node_list(buf)?,
            observers: get_node_list(buf)?,
        }),
        2 => Ok(ClusterEvent::WriteGateChanged {
            disabled: get_bool(buf)?,
        }),
        _ => Err(Error::MalformedFrame),
    }
}

// ---- peer rpcs

impl Payload for request::RequestVote {
    const TYPE: i32 = rpc_type::VOTE_REQUEST;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_node_id(buf, &self.candidate_id);
        put_clock(buf, &self.candidate_clock);
        buf.put_u64(self.vote_term);
        put_bool(buf, self.force_vote);
        put_bool(buf, self.pre_vote);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            candidate_id: get_node_id(buf)?,
            candidate_clock: get_clock(buf)?,
            vote_term: get_u64(buf)?,
            force_vote: get_bool(buf)?,
            pre_vote: get_bool(buf)?,
        })
    }
}

impl Payload for response::RequestVote {
    const TYPE: i32 = rpc_type::VOTE_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
        buf.put_u64(self.term);
        put_bool(buf, self.vote_granted);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self {
            term: get_u64(buf)?,
            vote_granted: get_bool(buf)?,
        })
    }
}

impl Payload for request::AppendEntries {
    const TYPE: i32 = rpc_type::APPEND_ENTRIES_REQUEST;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_node_id(buf, &self.leader_id);
        buf.put_u64(self.term);
        put_clock(buf, &self.prev_clock);
        buf.put_u64(self.leader_commit);
        buf.put_u32(self.entries.len() as u32);
        for e in &self.entries {
            put_entry(buf, e);
        }
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        let leader_id = get_node_id(buf)?;
        let term = get_u64(buf)?;
        let prev_clock = get_clock(buf)?;
        let leader_commit = get_u64(buf)?;
        let n = get_u32(buf)? as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            entries.push(get_entry(buf)?);
        }
        Ok(Self {
            leader_id,
            term,
            prev_clock,
            entries,
            leader_commit,
        })
    }
}

impl Payload for response::AppendEntries {
    const TYPE: i32 = rpc_type::APPEND_ENTRIES_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
        buf.put_u64(self.term);
        put_bool(buf, self.success);
        buf.put_u64(self.n_inserted);
        buf.put_u64(self.log_last_index);
        put_option(buf, &self.conflict, |b, c| put_clock(b, c));
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self {
            term: get_u64(buf)?,
            success: get_bool(buf)?,
            n_inserted: get_u64(buf)?,
            log_last_index: get_u64(buf)?,
            conflict: get_option(buf, get_clock)?,
        })
    }
}

impl Payload for request::InstallSnapshot {
    const TYPE: i32 = rpc_type::INSTALL_SNAPSHOT_REQUEST;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_node_id(buf, &self.leader_id);
        buf.put_u64(self.term);
        put_clock(buf, &self.last_included);
        put_config(buf, &self.config);
        buf.put_u64(self.offset);
        put_bytes(buf, &self.data);
        put_bool(buf, self.done);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            leader_id: get_node_id(buf)?,
            term: get_u64(buf)?,
            last_included: get_clock(buf)?,
            config: get_config(buf)?,
            offset: get_u64(buf)?,
            data: get_bytes(buf)?,
            done: get_bool(buf)?,
        })
    }
}

impl Payload for response::InstallSnapshot {
    const TYPE: i32 = rpc_type::INSTALL_SNAPSHOT_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
        buf.put_u64(self.term);
        put_bool(buf, self.success);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self {
            term: get_u64(buf)?,
            success: get_bool(buf)?,
        })
    }
}

impl Payload for request::TimeoutNow {
    const TYPE: i32 = rpc_type::TIMEOUT_NOW_REQUEST;

    fn encode_payload(&self, _buf: &mut BytesMut) {}

    fn decode_payload(_buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self)
    }
}

impl Payload for response::TimeoutNow {
    const TYPE: i32 = rpc_type::TIMEOUT_NOW_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self)
    }
}

// ---- client rpcs

impl Payload for request::UpdateClusterState {
    const TYPE: i32 = rpc_type::UPDATE_CLUSTER_STATE_REQUEST;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u32(self.requests.len() as u32);
        for r in &self.requests {
            buf.put_u16(r.partition);
            buf.put_u16(r.batch_size);
            put_bytes(buf, &r.payload);
        }
        put_bool(buf, self.include_header);
        put_response_level(buf, self.response_level);
        put_option(buf, &self.transaction, |b, id| put_uuid(b, id));
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        let n = get_u32(buf)? as usize;
        let mut requests = Vec::with_capacity(n);
        for _ in 0..n {
            let partition = get_u16(buf)?;
            let batch_size = get_u16(buf)?;
            let payload = get_bytes(buf)?;
            requests.push(UpdateRequest {
                payload,
                partition,
                batch_size,
            });
        }
        Ok(Self {
            requests,
            include_header: get_bool(buf)?,
            response_level: get_response_level(buf)?,
            transaction: get_option(buf, get_uuid)?,
        })
    }
}

impl Payload for response::UpdateClusterState {
    const TYPE: i32 = rpc_type::UPDATE_CLUSTER_STATE_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
        match &self.results {
            Some(results) => {
                buf.put_u8(1);
                buf.put_u32(results.len() as u32);
                for r in results {
                    put_bytes(buf, r);
                }
            }
            None => buf.put_u8(0),
        }
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        let results = if get_bool(buf)? {
            let n = get_u32(buf)? as usize;
            let mut out = Vec::with_capacity(n);
            for _ in 0..n {
                out.push(get_bytes(buf)?);
            }
            Some(out)
        } else {
            None
        };
        Ok(Self { results })
    }
}

impl Payload for request::QueryClusterState {
    const TYPE: i32 = rpc_type::QUERY_CLUSTER_STATE_REQUEST;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_bytes(buf, &self.query);
        let code = match self.consistency {
            Consistency::Strong => 0u8,
            Consistency::Sequential => 1,
        };
        buf.put_u8(code);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        let query = get_bytes(buf)?;
        let consistency = match get_u8(buf)? {
            0 => Consistency::Strong,
            1 => Consistency::Sequential,
            _ => return Err(Error::MalformedFrame),
        };
        Ok(Self { query, consistency })
    }
}

impl Payload for response::QueryClusterState {
    const TYPE: i32 = rpc_type::QUERY_CLUSTER_STATE_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
        put_bytes(buf, &self.result);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self {
            result: get_bytes(buf)?,
        })
    }
}

impl Payload for request::GetServers {
    const TYPE: i32 = rpc_type::GET_SERVERS_REQUEST;

    fn encode_payload(&self, _buf: &mut BytesMut) {}

    fn decode_payload(_buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self)
    }
}

impl Payload for response::ClusterInfo {
    const TYPE: i32 = rpc_type::GET_SERVERS_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
        put_option(buf, &self.known_leader, |b, id| put_node_id(b, id));
        buf.put_u64(self.leader_term);
        put_node_list(buf, &self.voters);
        put_node_list(buf, &self.observers);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self {
            known_leader: get_option(buf, get_node_id)?,
            leader_term: get_u64(buf)?,
            voters: get_node_list(buf)?,
            observers: get_node_list(buf)?,
        })
    }
}

impl Payload for request::UpdateVoters {
    const TYPE: i32 = rpc_type::UPDATE_VOTERS_REQUEST;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_node_list(buf, &self.old);
        put_node_list(buf, &self.new);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            old: get_node_list(buf)?,
            new: get_node_list(buf)?,
        })
    }
}

impl Payload for response::UpdateVoters {
    const TYPE: i32 = rpc_type::UPDATE_VOTERS_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self)
    }
}

impl Payload for request::ConvertRoll {
    const TYPE: i32 = rpc_type::CONVERT_ROLL_REQUEST;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_node_id(buf, &self.node);
        put_roll(buf, self.roll);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            node: get_node_id(buf)?,
            roll: get_roll(buf)?,
        })
    }
}

impl Payload for response::ConvertRoll {
    const TYPE: i32 = rpc_type::CONVERT_ROLL_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self)
    }
}

impl Payload for request::DisableLeaderWrite {
    const TYPE: i32 = rpc_type::DISABLE_LEADER_WRITE_REQUEST;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_i64(self.timeout_ms);
        buf.put_i32(self.term);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            timeout_ms: get_i64(buf)?,
            term: get_i32(buf)?,
        })
    }
}

impl Payload for response::DisableLeaderWrite {
    const TYPE: i32 = rpc_type::DISABLE_LEADER_WRITE_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
        buf.put_u64(self.term);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self {
            term: get_u64(buf)?,
        })
    }
}

// ---- transactions

impl Payload for request::CreateTransaction {
    const TYPE: i32 = rpc_type::CREATE_TRANSACTION_REQUEST;

    fn encode_payload(&self, _buf: &mut BytesMut) {}

    fn decode_payload(_buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self)
    }
}

impl Payload for response::CreateTransaction {
    const TYPE: i32 = rpc_type::CREATE_TRANSACTION_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
        put_uuid(buf, &self.tx_id);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self {
            tx_id: get_uuid(buf)?,
        })
    }
}

impl Payload for request::CompleteTransaction {
    const TYPE: i32 = rpc_type::COMPLETE_TRANSACTION_REQUEST;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_uuid(buf, &self.tx_id);
        put_bool(buf, self.commit);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            tx_id: get_uuid(buf)?,
            commit: get_bool(buf)?,
        })
    }
}

impl Payload for response::CompleteTransaction {
    const TYPE: i32 = rpc_type::COMPLETE_TRANSACTION_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        Ok(Self)
    }
}

impl Payload for request::OpeningTransactions {
    const TYPE: i32 = rpc_type::OPENING_TRANSACTIONS_REQUEST;

    fn encode_payload(&self, _buf: &mut BytesMut) {}

    fn decode_payload(_buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self)
    }
}

impl Payload for response::OpeningTransactions {
    const TYPE: i32 = rpc_type::OPENING_TRANSACTIONS_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
        buf.put_u32(self.tx_ids.len() as u32);
        for id in &self.tx_ids {
            put_uuid(buf, id);
        }
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        let n = get_u32(buf)? as usize;
        let mut tx_ids = Vec::with_capacity(n);
        for _ in 0..n {
            tx_ids.push(get_uuid(buf)?);
        }
        Ok(Self { tx_ids })
    }
}

impl Payload for request::Watch {
    const TYPE: i32 = rpc_type::WATCH_REQUEST;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u64(self.since);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            since: get_u64(buf)?,
        })
    }
}

impl Payload for response::Watch {
    const TYPE: i32 = rpc_type::WATCH_RESPONSE;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_ok(buf);
        buf.put_u32(self.events.len() as u32);
        for (seq, ev) in &self.events {
            buf.put_u64(*seq);
            put_event(buf, ev);
        }
        buf.put_u64(self.head);
    }

    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error> {
        check_status(buf)?;
        let n = get_u32(buf)? as usize;
        let mut events = Vec::with_capacity(n);
        for _ in 0..n {
            let seq = get_u64(buf)?;
            let ev = get_event(buf)?;
            events.push((seq, ev));
        }
        Ok(Self {
            events,
            head: get_u64(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Clock;

    #[test]
    fn disable_leader_write_byte_layout() {
        let req = request::DisableLeaderWrite {
            timeout_ms: 12345,
            term: 42,
        };
        let bin = req.to_bytes();
        assert_eq!(
            &bin[..],
            &[
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x30, 0x39, // 12345 as i64 BE
                0x00, 0x00, 0x00, 0x2A, // 42 as i32 BE
            ]
        );

        let back = request::DisableLeaderWrite::from_bytes(bin).unwrap();
        assert_eq!(back.timeout_ms, 12345);
        assert_eq!(back.term, 42);
    }

    #[test]
    fn vote_request_round_trip() {
        let req = request::RequestVote {
            candidate_id: "127.0.0.1:4000".parse().unwrap(),
            candidate_clock: Clock { term: 3, index: 12 },
            vote_term: 4,
            force_vote: false,
            pre_vote: true,
        };
        let back = request::RequestVote::from_bytes(req.to_bytes()).unwrap();
        assert_eq!(back.candidate_id, req.candidate_id);
        assert_eq!(back.candidate_clock, req.candidate_clock);
        assert_eq!(back.vote_term, 4);
        assert!(!back.force_vote);
        assert!(back.pre_vote);
    }

    #[test]
    fn update_request_round_trip() {
        let req = request::UpdateClusterState {
            requests: vec![
                UpdateRequest {
                    payload: Bytes::from_static(b"x"),
                    partition: 0,
                    batch_size: 1,
                },
                UpdateRequest {
                    payload: Bytes::from_static(b"y"),
                    partition: 9,
                    batch_size: 3,
                },
            ],
            include_header: true,
            response_level: ResponseLevel::All,
            transaction: Some(uuid::Uuid::new_v4()),
        };
        let back = request::UpdateClusterState::from_bytes(req.to_bytes()).unwrap();
        assert_eq!(back.requests.len(), 2);
        assert_eq!(back.requests[1].partition, 9);
        assert_eq!(back.requests[1].batch_size, 3);
        assert_eq!(back.response_level, ResponseLevel::All);
        assert_eq!(back.transaction, req.transaction);
    }

    #[test]
    fn error_status_decodes_to_error() {
        let e = Error::NotLeader(Some("127.0.0.1:9000".parse().unwrap()));
        let bin = error_payload(&e);
        let r = response::UpdateClusterState::from_bytes(bin);
        match r {
            Err(Error::NotLeader(Some(hint))) => {
                assert_eq!(hint.to_string(), "127.0.0.1:9000");
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let req = request::Watch { since: 9 };
        let mut bin = BytesMut::from(&req.to_bytes()[..]);
        bin.put_u8(0);
        assert!(matches!(
            request::Watch::from_bytes(bin.freeze()),
            Err(Error::MalformedFrame)
        ));
    }
}
