//! Serializer for the opaque class and header sections.
//!
//! The class section is the class name as raw UTF-8. The header section is
//! a sequence of `(key, value)` pairs, each string written as a 4-byte
//! big-endian length followed by its bytes. A length of `-1` denotes a
//! null string and decodes as empty.

use crate::error::ProtocolError;
use crate::mapper::HeaderMap;
use bytes::{Buf, BufMut, Bytes, BytesMut};

const NULL_LEN: u32 = u32::MAX;

/// Serializes a class name.
pub fn encode_class_name(name: &str) -> Bytes {
    Bytes::copy_from_slice(name.as_bytes())
}

/// Deserializes a class section.
pub fn decode_class_name(section: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(section)
        .map(str::to_string)
        .map_err(|_| ProtocolError::InvalidUtf8("class"))
}

/// Serializes a header map in key order. An empty map yields no bytes.
pub fn encode_header_map(headers: &HeaderMap) -> Result<Bytes, ProtocolError> {
    let size: usize = headers.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut buf = BytesMut::with_capacity(size);
    for (key, value) in headers {
        put_string(&mut buf, key)?;
        put_string(&mut buf, value)?;
    }
    Ok(buf.freeze())
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    let len = u32::try_from(s.len())
        .ok()
        .filter(|len| *len != NULL_LEN)
        .ok_or(ProtocolError::FrameLengthInconsistency {
            section: "header",
            length: s.len() as u64,
            max: (NULL_LEN - 1) as u64,
        })?;
    buf.put_u32(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Deserializes a header section.
pub fn decode_header_map(section: &[u8]) -> Result<HeaderMap, ProtocolError> {
    let mut headers = HeaderMap::new();
    let mut cursor = section;
    while cursor.has_remaining() {
        let key = take_string(section, &mut cursor, "truncated key")?;
        let value = take_string(section, &mut cursor, "truncated value")?;
        headers.insert(key, value);
    }
    Ok(headers)
}

fn take_string(
    section: &[u8],
    cursor: &mut &[u8],
    reason: &'static str,
) -> Result<String, ProtocolError> {
    let offset = section.len() - cursor.len();
    let malformed = ProtocolError::MalformedSection {
        section: "header",
        offset,
        reason,
    };
    if cursor.remaining() < 4 {
        return Err(malformed);
    }
    let len = cursor.get_u32();
    if len == NULL_LEN {
        return Ok(String::new());
    }
    let len = len as usize;
    if cursor.remaining() < len {
        return Err(malformed);
    }
    let s = std::str::from_utf8(&cursor[..len])
        .map_err(|_| ProtocolError::InvalidUtf8("header"))?
        .to_string();
    cursor.advance(len);
    Ok(s)
}
