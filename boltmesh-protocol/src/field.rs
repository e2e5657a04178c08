//! Frame field registry.
//!
//! A fixed table from logical header-field name to its native integer
//! width. The property mapper consults it to coerce string header values;
//! the encoder and decoder never do, their widths come from
//! [`FrameLayout`](crate::layout::FrameLayout). The layouts are checked
//! against these widths at compile time.

use crate::error::ProtocolError;
use crate::PROPERTY_HEADER_PREFIX;
use std::fmt;
use std::str::FromStr;

/// Native integer type of a registry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    U8,
    I16,
    U16,
    U32,
    I64,
}

impl FieldKind {
    /// Size of the native type in bytes.
    pub const fn width(self) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::I16 | FieldKind::U16 => 2,
            FieldKind::U32 => 4,
            FieldKind::I64 => 8,
        }
    }
}

/// Header fields that are lifted into typed command fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameField {
    Protocol,
    CmdType,
    CmdCode,
    Version,
    RequestId,
    Codec,
    Timeout,
    ResponseStatus,
    ClassLength,
    HeaderLength,
    ContentLength,
    ResponseTimeMillis,
}

/// The registry itself. Order is irrelevant; names are unique.
const REGISTRY: [(FrameField, &str, FieldKind); 12] = [
    (FrameField::Protocol, "protocol", FieldKind::U8),
    (FrameField::CmdType, "cmdType", FieldKind::U8),
    (FrameField::CmdCode, "cmdCode", FieldKind::I16),
    (FrameField::Version, "version", FieldKind::U8),
    (FrameField::RequestId, "requestId", FieldKind::U32),
    (FrameField::Codec, "codec", FieldKind::U8),
    (FrameField::Timeout, "timeout", FieldKind::U32),
    (FrameField::ResponseStatus, "responseStatus", FieldKind::U16),
    (FrameField::ClassLength, "classLength", FieldKind::U16),
    (FrameField::HeaderLength, "headerLength", FieldKind::U16),
    (FrameField::ContentLength, "contentLength", FieldKind::U32),
    (FrameField::ResponseTimeMillis, "responseTimeMills", FieldKind::I64),
];

impl FrameField {
    /// Every registered field.
    pub const ALL: [FrameField; 12] = [
        FrameField::Protocol,
        FrameField::CmdType,
        FrameField::CmdCode,
        FrameField::Version,
        FrameField::RequestId,
        FrameField::Codec,
        FrameField::Timeout,
        FrameField::ResponseStatus,
        FrameField::ClassLength,
        FrameField::HeaderLength,
        FrameField::ContentLength,
        FrameField::ResponseTimeMillis,
    ];

    /// Bare header name of this field.
    pub const fn name(self) -> &'static str {
        REGISTRY[self as usize].1
    }

    /// Native type of this field.
    pub const fn kind(self) -> FieldKind {
        REGISTRY[self as usize].2
    }

    /// Looks up a field by its bare header name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }

    /// Protocol-namespaced header key for this field.
    pub fn property_key(self) -> String {
        property_key(self.name())
    }

    /// Parses a header value at this field's exact native width.
    pub fn parse(self, raw: &str) -> Result<FieldValue, ProtocolError> {
        let text = raw.trim();
        let value = match self.kind() {
            FieldKind::U8 => parse_int(text).map(FieldValue::U8),
            FieldKind::I16 => parse_int(text).map(FieldValue::I16),
            FieldKind::U16 => parse_int(text).map(FieldValue::U16),
            FieldKind::U32 => parse_int(text).map(FieldValue::U32),
            FieldKind::I64 => parse_int(text).map(FieldValue::I64),
        };
        value.ok_or_else(|| ProtocolError::MalformedHeaderValue {
            field: self.name(),
            value: raw.to_string(),
        })
    }
}

impl fmt::Display for FrameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_int<T: FromStr>(text: &str) -> Option<T> {
    text.parse().ok()
}

/// Returns the native type registered for `name`, or `None` when the
/// header is opaque passthrough (e.g. `className`).
pub fn lookup(name: &str) -> Option<FieldKind> {
    FrameField::from_name(name).map(FrameField::kind)
}

/// Parses a header value by field name.
pub fn coerce(name: &str, raw: &str) -> Result<FieldValue, ProtocolError> {
    FrameField::from_name(name)
        .ok_or_else(|| ProtocolError::UnknownField(name.to_string()))?
        .parse(raw)
}

/// Builds the protocol-namespaced variant of a header key.
pub fn property_key(name: &str) -> String {
    format!("{}{}", PROPERTY_HEADER_PREFIX, name)
}

/// A header value coerced to its registry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    U8(u8),
    I16(i16),
    U16(u16),
    U32(u32),
    I64(i64),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::U8(_) => FieldKind::U8,
            FieldValue::I16(_) => FieldKind::I16,
            FieldValue::U16(_) => FieldKind::U16,
            FieldValue::U32(_) => FieldKind::U32,
            FieldValue::I64(_) => FieldKind::I64,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match *self {
            FieldValue::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match *self {
            FieldValue::I16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match *self {
            FieldValue::U16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            FieldValue::U32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::I64(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::U8(v) => write!(f, "{}", v),
            FieldValue::I16(v) => write!(f, "{}", v),
            FieldValue::U16(v) => write!(f, "{}", v),
            FieldValue::U32(v) => write!(f, "{}", v),
            FieldValue::I64(v) => write!(f, "{}", v),
        }
    }
}
