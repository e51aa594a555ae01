//! Bit-exact framing of typed request/response payloads.
//!
//! A frame travels inside one length-delimited chunk on the transport:
//!
//! ```text
//! u8  version
//! i32 type code
//! u64 request id (correlation)
//! str sender id
//! str receiver id
//! ... payload (per-type codec)
//! ```
//!
//! All integers are fixed-width big-endian, strings are u32-length-prefixed
//! UTF-8, optional fields are a one-byte presence flag followed by the value.
//! Decoders fail with `MalformedFrame` on short reads or trailing bytes and
//! with `UnknownType` on unrecognized type codes; slack is never tolerated.

use crate::Error;
use bytes::{Bytes, BytesMut};

pub mod codec;
pub mod entry;
pub mod payload;

pub const VERSION: u8 = 1;

/// Stable numeric identifiers, one per typed message.
pub mod rpc_type {
    pub const VOTE_REQUEST: i32 = 1;
    pub const VOTE_RESPONSE: i32 = 2;
    pub const APPEND_ENTRIES_REQUEST: i32 = 3;
    pub const APPEND_ENTRIES_RESPONSE: i32 = 4;
    pub const INSTALL_SNAPSHOT_REQUEST: i32 = 5;
    pub const INSTALL_SNAPSHOT_RESPONSE: i32 = 6;
    pub const TIMEOUT_NOW_REQUEST: i32 = 7;
    pub const TIMEOUT_NOW_RESPONSE: i32 = 8;

    pub const UPDATE_CLUSTER_STATE_REQUEST: i32 = 20;
    pub const UPDATE_CLUSTER_STATE_RESPONSE: i32 = 21;
    pub const QUERY_CLUSTER_STATE_REQUEST: i32 = 22;
    pub const QUERY_CLUSTER_STATE_RESPONSE: i32 = 23;
    pub const GET_SERVERS_REQUEST: i32 = 24;
    pub const GET_SERVERS_RESPONSE: i32 = 25;
    pub const UPDATE_VOTERS_REQUEST: i32 = 26;
    pub const UPDATE_VOTERS_RESPONSE: i32 = 27;
    pub const CONVERT_ROLL_REQUEST: i32 = 28;
    pub const CONVERT_ROLL_RESPONSE: i32 = 29;
    pub const DISABLE_LEADER_WRITE_REQUEST: i32 = 30;
    pub const DISABLE_LEADER_WRITE_RESPONSE: i32 = 31;

    pub const CREATE_TRANSACTION_REQUEST: i32 = 40;
    pub const CREATE_TRANSACTION_RESPONSE: i32 = 41;
    pub const COMPLETE_TRANSACTION_REQUEST: i32 = 42;
    pub const COMPLETE_TRANSACTION_RESPONSE: i32 = 43;
    pub const OPENING_TRANSACTIONS_REQUEST: i32 = 44;
    pub const OPENING_TRANSACTIONS_RESPONSE: i32 = 45;
    pub const WATCH_REQUEST: i32 = 46;
    pub const WATCH_RESPONSE: i32 = 47;

    pub fn is_known(code: i32) -> bool {
        matches!(code, 1..=8 | 20..=31 | 40..=47)
    }

    /// The response code paired with a request code.
    pub fn response_of(request: i32) -> i32 {
        request + 1
    }
}

/// Completion status of a response, the first byte of every response payload.
pub mod status {
    pub const OK: u8 = 0;
    pub const NOT_LEADER: u8 = 1;
    pub const WRITE_DISABLED: u8 = 2;
    pub const TIMEOUT: u8 = 3;
    pub const TRANSACTION_INVALIDATED: u8 = 4;
    pub const STOPPED: u8 = 5;
    pub const STORAGE_FAULT: u8 = 6;
    pub const CONFIGURATION_CONFLICT: u8 = 7;
    pub const INTERNAL: u8 = 255;
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameHeader {
    pub version: u8,
    pub typ: i32,
    pub request_id: u64,
    pub sender: String,
    pub receiver: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn encode(&self) -> Bytes {
        use bytes::BufMut;
        let mut buf = BytesMut::new();
        buf.put_u8(self.header.version);
        buf.put_i32(self.header.typ);
        buf.put_u64(self.header.request_id);
        codec::put_string(&mut buf, &self.header.sender);
        codec::put_string(&mut buf, &self.header.receiver);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// `buf` must hold exactly one frame (the transport strips the outer
    /// length prefix). The remainder after the header is the payload.
    pub fn decode(mut buf: Bytes) -> Result<Frame, Error> {
        let version = codec::get_u8(&mut buf)?;
        if version != VERSION {
            return Err(Error::MalformedFrame);
        }
        let typ = codec::get_i32(&mut buf)?;
        if !rpc_type::is_known(typ) {
            return Err(Error::UnknownType(typ));
        }
        let request_id = codec::get_u64(&mut buf)?;
        let sender = codec::get_string(&mut buf)?;
        let receiver = codec::get_string(&mut buf)?;
        Ok(Frame {
            header: FrameHeader {
                version,
                typ,
                request_id,
                sender,
                receiver,
            },
            payload: buf,
        })
    }
}

/// A typed message that can ride in a frame.
pub trait Payload: Sized {
    const TYPE: i32;

    fn encode_payload(&self, buf: &mut BytesMut);
    fn decode_payload(buf: &mut Bytes) -> Result<Self, Error>;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_payload(&mut buf);
        buf.freeze()
    }

    /// Strict decode: trailing bytes are an error.
    fn from_bytes(mut buf: Bytes) -> Result<Self, Error> {
        let v = Self::decode_payload(&mut buf)?;
        if !buf.is_empty() {
            return Err(Error::MalformedFrame);
        }
        Ok(v)
    }
}

pub fn error_to_status(e: &Error) -> (u8, Option<String>) {
    match e {
        Error::NotLeader(hint) => (status::NOT_LEADER, hint.as_ref().map(|id| id.to_string())),
        Error::LeaderWriteDisabled => (status::WRITE_DISABLED, None),
        Error::Timeout => (status::TIMEOUT, None),
        Error::TransactionInvalidated => (status::TRANSACTION_INVALIDATED, None),
        Error::Stopped => (status::STOPPED, None),
        Error::StorageFault(_) => (status::STORAGE_FAULT, None),
        Error::ConfigurationConflict => (status::CONFIGURATION_CONFLICT, None),
        _ => (status::INTERNAL, None),
    }
}

pub fn status_to_error(code: u8, hint: Option<String>) -> Error {
    match code {
        status::NOT_LEADER => Error::NotLeader(hint.and_then(|s| s.parse().ok())),
        status::WRITE_DISABLED => Error::LeaderWriteDisabled,
        status::TIMEOUT => Error::Timeout,
        status::TRANSACTION_INVALIDATED => Error::TransactionInvalidated,
        status::STOPPED => Error::Stopped,
        status::STORAGE_FAULT => Error::StorageFault("remote".to_owned()),
        status::CONFIGURATION_CONFLICT => Error::ConfigurationConflict,
        _ => Error::MalformedFrame,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let frame = Frame {
            header: FrameHeader {
                version: VERSION,
                typ: rpc_type::VOTE_REQUEST,
                request_id: 77,
                sender: "127.0.0.1:4000".to_owned(),
                receiver: "127.0.0.1:4001".to_owned(),
            },
            payload: Bytes::from_static(b"abc"),
        };
        let bin = frame.encode();
        let back = Frame::decode(bin).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn frame_rejects_unknown_type() {
        let frame = Frame {
            header: FrameHeader {
                version: VERSION,
                typ: 9999,
                request_id: 1,
                sender: String::new(),
                receiver: String::new(),
            },
            payload: Bytes::new(),
        };
        let bin = frame.encode();
        assert!(matches!(Frame::decode(bin), Err(Error::UnknownType(9999))));
    }

    #[test]
    fn frame_rejects_short_read() {
        let frame = Frame {
            header: FrameHeader {
                version: VERSION,
                typ: rpc_type::VOTE_REQUEST,
                request_id: 1,
                sender: "a".to_owned(),
                receiver: "b".to_owned(),
            },
            payload: Bytes::new(),
        };
        let bin = frame.encode();
        let truncated = bin.slice(..bin.len() - 1);
        assert!(matches!(
            Frame::decode(truncated),
            Err(Error::MalformedFrame)
        ));
    }
}
