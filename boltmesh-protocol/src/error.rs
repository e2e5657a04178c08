//! Protocol error types.
//!
//! Running out of buffered bytes is not an error: decoders report it as
//! `Ok(None)`. Every variant here is fatal for the frame (encode side) or
//! for the whole connection (decode side), since the wire format has no
//! resynchronization point.

use thiserror::Error;

/// Errors raised while mapping, encoding or decoding Bolt frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing required header field: {0}")]
    MissingField(&'static str),

    #[error("malformed value for header field {field}: {value:?}")]
    MalformedHeaderValue { field: &'static str, value: String },

    #[error("no registry entry for header field: {0}")]
    UnknownField(String),

    #[error("unsupported command code: {0}")]
    UnsupportedCommandCode(i16),

    #[error("frame length inconsistency in {section}: {length} bytes (max {max})")]
    FrameLengthInconsistency {
        section: &'static str,
        length: u64,
        max: u64,
    },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed {section} section at offset {offset}: {reason}")]
    MalformedSection {
        section: &'static str,
        offset: usize,
        reason: &'static str,
    },

    #[error("invalid UTF-8 in {0} section")]
    InvalidUtf8(&'static str),
}

impl ProtocolError {
    /// Returns whether this error was caused by caller-supplied headers
    /// rather than by bytes read off the wire.
    pub fn is_encode_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::MissingField(_)
                | ProtocolError::MalformedHeaderValue { .. }
                | ProtocolError::UnknownField(_)
                | ProtocolError::UnsupportedCommandCode(_)
        )
    }
}
