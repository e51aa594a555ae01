//! Primitive field codecs shared by every typed payload.
//!
//! Integers are fixed-width big-endian. A string is a u32 byte length
//! followed by UTF-8. An optional value is a one-byte presence flag
//! followed by the value when the flag is 1.

use crate::{Error, NodeId};
use bytes::{Buf, BufMut, Bytes, BytesMut};

macro_rules! get_int {
    ($name:ident, $ty:ty, $width:expr, $buf_get:ident) => {
        pub fn $name(buf: &mut Bytes) -> Result<$ty, Error> {
            if buf.remaining() < $width {
                return Err(Error::MalformedFrame);
            }
            Ok(buf.$buf_get())
        }
    };
}

get_int!(get_u8, u8, 1, get_u8);
get_int!(get_u16, u16, 2, get_u16);
get_int!(get_u32, u32, 4, get_u32);
get_int!(get_u64, u64, 8, get_u64);
get_int!(get_i32, i32, 4, get_i32);
get_int!(get_i64, i64, 8, get_i64);

pub fn get_bool(buf: &mut Bytes) -> Result<bool, Error> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::MalformedFrame),
    }
}

pub fn put_bool(buf: &mut BytesMut, v: bool) {
    buf.put_u8(v as u8);
}

pub fn put_bytes(buf: &mut BytesMut, v: &[u8]) {
    buf.put_u32(v.len() as u32);
    buf.extend_from_slice(v);
}

pub fn get_bytes(buf: &mut Bytes) -> Result<Bytes, Error> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::MalformedFrame);
    }
    Ok(buf.split_to(len))
}

pub fn put_string(buf: &mut BytesMut, v: &str) {
    put_bytes(buf, v.as_bytes());
}

pub fn get_string(buf: &mut Bytes) -> Result<String, Error> {
    let raw = get_bytes(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| Error::MalformedFrame)
}

pub fn put_option<T>(buf: &mut BytesMut, v: &Option<T>, put: impl Fn(&mut BytesMut, &T)) {
    match v {
        Some(x) => {
            buf.put_u8(1);
            put(buf, x);
        }
        None => buf.put_u8(0),
    }
}

pub fn get_option<T>(
    buf: &mut Bytes,
    get: impl Fn(&mut Bytes) -> Result<T, Error>,
) -> Result<Option<T>, Error> {
    if get_bool(buf)? {
        Ok(Some(get(buf)?))
    } else {
        Ok(None)
    }
}

pub fn put_node_id(buf: &mut BytesMut, id: &NodeId) {
    put_string(buf, &id.to_string());
}

pub fn get_node_id(buf: &mut Bytes) -> Result<NodeId, Error> {
    let s = get_string(buf)?;
    s.parse().map_err(|_| Error::MalformedFrame)
}

pub fn put_uuid(buf: &mut BytesMut, id: &uuid::Uuid) {
    buf.extend_from_slice(id.as_bytes());
}

pub fn get_uuid(buf: &mut Bytes) -> Result<uuid::Uuid, Error> {
    if buf.remaining() < 16 {
        return Err(Error::MalformedFrame);
    }
    let raw = buf.split_to(16);
    Ok(uuid::Uuid::from_slice(&raw).expect("16 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "journal");
        let mut b = buf.freeze();
        assert_eq!(get_string(&mut b).unwrap(), "journal");
        assert!(b.is_empty());
    }

    #[test]
    fn short_read_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.extend_from_slice(b"abc");
        let mut b = buf.freeze();
        assert!(matches!(get_bytes(&mut b), Err(Error::MalformedFrame)));
    }

    #[test]
    fn option_presence_flag() {
        let mut buf = BytesMut::new();
        put_option(&mut buf, &Some(42u64), |b, v| b.put_u64(*v));
        put_option::<u64>(&mut buf, &None, |b, v| b.put_u64(*v));
        let mut b = buf.freeze();
        assert_eq!(get_option(&mut b, get_u64).unwrap(), Some(42));
        assert_eq!(get_option(&mut b, get_u64).unwrap(), None);
        assert!(b.is_empty());
    }
}
