//! # boltmesh-protocol
//!
//! Wire codec for the Bolt v1 RPC protocol as spoken by the boltmesh proxy.
//!
//! This crate provides:
//! - Fixed-offset frame layouts for requests and responses
//! - A typed command model with opaque class/header/content sections
//! - A field registry mapping header names onto wire-sized integers
//! - Translation between string header maps and commands
//! - A stateless encoder and an incremental, re-invocable decoder

pub mod codec;
pub mod command;
pub mod error;
pub mod field;
pub mod layout;
pub mod mapper;
pub mod serialize;

pub use codec::{Decoder, Encoder};
pub use command::{Command, CommandFamily, CommandHeader, RequestCommand, ResponseCommand};
pub use error::ProtocolError;
pub use field::{FieldKind, FieldValue, FrameField};
pub use layout::{FieldSlot, FrameLayout, REQUEST_LAYOUT, RESPONSE_LAYOUT};
pub use mapper::{to_command, to_headers, HeaderMap, Mapped};

/// Protocol code carried in the first byte of every v1 frame.
pub const PROTOCOL_CODE_V1: u8 = 1;

/// Bytes needed before the request/response discriminant can be read.
pub const MIN_DISCRIMINANT_LEN: usize = 2;

/// Fixed header size of a request frame.
pub const REQUEST_HEADER_LEN: usize = 22;

/// Fixed header size of a response frame.
pub const RESPONSE_HEADER_LEN: usize = 20;

/// Default upper bound on a single decoded frame (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Prefix of the protocol-namespaced variant of a header key.
pub const PROPERTY_HEADER_PREFIX: &str = "x-mosn-sofarpc-headers-property-";

/// Command type values (wire byte 1).
pub mod cmd_type {
    pub const REQUEST: u8 = 0;
    pub const RESPONSE: u8 = 1;
    pub const REQUEST_ONEWAY: u8 = 2;
}

/// Command code values (wire bytes 2..4).
pub mod cmd_code {
    /// Heartbeats are not framed by this codec.
    pub const HEARTBEAT: i16 = 0;
    pub const RPC_REQUEST: i16 = 1;
    pub const RPC_RESPONSE: i16 = 2;
}
