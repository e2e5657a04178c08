//! Bolt v1 command model.

use crate::error::ProtocolError;
use crate::field::FrameField;
use crate::layout::{FrameLayout, REQUEST_LAYOUT, RESPONSE_LAYOUT};
use crate::{cmd_code, cmd_type};
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Command family selected by the command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFamily {
    Request,
    Response,
}

impl CommandFamily {
    pub fn from_cmd_code(code: i16) -> Result<Self, ProtocolError> {
        match code {
            cmd_code::RPC_REQUEST => Ok(CommandFamily::Request),
            cmd_code::RPC_RESPONSE => Ok(CommandFamily::Response),
            other => Err(ProtocolError::UnsupportedCommandCode(other)),
        }
    }
}

/// Fields shared by requests and responses.
///
/// The wire length fields are not stored: they are always the lengths of
/// `class`, `header` and `content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHeader {
    pub protocol: u8,
    pub cmd_type: u8,
    pub cmd_code: i16,
    pub version: u8,
    /// Connection-scoped correlation id.
    pub request_id: u32,
    pub codec: u8,
    /// Serialized class name.
    pub class: Bytes,
    /// Serialized header map.
    pub header: Bytes,
    pub content: Bytes,
}

impl CommandHeader {
    pub fn class_len(&self) -> usize {
        self.class.len()
    }

    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    pub fn content_len(&self) -> usize {
        self.content.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCommand {
    pub common: CommandHeader,
    /// Timeout in milliseconds.
    pub timeout: u32,
    /// Wall-clock time the frame was decoded; `None` on the outbound path.
    pub arrive_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCommand {
    pub common: CommandHeader,
    pub status: u16,
    /// Wall-clock time the frame was decoded, or the caller-supplied
    /// `responseTimeMills` on the outbound path.
    pub response_time: Option<DateTime<Utc>>,
}

/// A decoded or to-be-encoded Bolt frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Request(RequestCommand),
    Response(ResponseCommand),
}

impl Command {
    pub fn common(&self) -> &CommandHeader {
        match self {
            Command::Request(r) => &r.common,
            Command::Response(r) => &r.common,
        }
    }

    fn common_mut(&mut self) -> &mut CommandHeader {
        match self {
            Command::Request(r) => &mut r.common,
            Command::Response(r) => &mut r.common,
        }
    }

    pub fn request_id(&self) -> u32 {
        self.common().request_id
    }

    pub fn cmd_type(&self) -> u8 {
        self.common().cmd_type
    }

    pub fn cmd_code(&self) -> i16 {
        self.common().cmd_code
    }

    pub fn family(&self) -> CommandFamily {
        match self {
            Command::Request(_) => CommandFamily::Request,
            Command::Response(_) => CommandFamily::Response,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Command::Request(_))
    }

    /// Returns true for requests that expect no response.
    pub fn is_oneway(&self) -> bool {
        self.is_request() && self.cmd_type() == cmd_type::REQUEST_ONEWAY
    }

    /// Wire layout of this variant.
    pub fn layout(&self) -> &'static FrameLayout {
        match self {
            Command::Request(_) => &REQUEST_LAYOUT,
            Command::Response(_) => &RESPONSE_LAYOUT,
        }
    }

    /// Replaces the content section.
    pub fn with_content(mut self, content: Bytes) -> Self {
        self.common_mut().content = content;
        self
    }

    /// Bit pattern of a fixed wire field, as written by the encoder.
    ///
    /// Fields the variant does not carry read as zero; the layouts never
    /// ask for them.
    pub fn wire_value(&self, field: FrameField) -> u64 {
        let c = self.common();
        match field {
            FrameField::Protocol => c.protocol as u64,
            FrameField::CmdType => c.cmd_type as u64,
            FrameField::CmdCode => c.cmd_code as u16 as u64,
            FrameField::Version => c.version as u64,
            FrameField::RequestId => c.request_id as u64,
            FrameField::Codec => c.codec as u64,
            FrameField::ClassLength => c.class_len() as u64,
            FrameField::HeaderLength => c.header_len() as u64,
            FrameField::ContentLength => c.content_len() as u64,
            FrameField::Timeout => match self {
                Command::Request(r) => r.timeout as u64,
                Command::Response(_) => 0,
            },
            FrameField::ResponseStatus => match self {
                Command::Response(r) => r.status as u64,
                Command::Request(_) => 0,
            },
            FrameField::ResponseTimeMillis => 0,
        }
    }
}
