//! Translation between string header maps and commands.
//!
//! Each typed field is looked up under its namespaced key first
//! (`x-mosn-sofarpc-headers-property-<name>`) and then under its bare name;
//! the first match is consumed. Whatever is left travels verbatim in the
//! serialized header section.

use crate::command::{Command, CommandFamily, CommandHeader, RequestCommand, ResponseCommand};
use crate::error::ProtocolError;
use crate::field::{property_key, FieldValue, FrameField};
use crate::layout::FrameLayout;
use crate::serialize;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// String-keyed header dictionary. Ordered so that serialized header
/// sections are deterministic.
pub type HeaderMap = BTreeMap<String, String>;

/// Header key carrying the class name.
pub const CLASS_NAME_KEY: &str = "className";

/// Result of mapping a header map onto a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapped {
    pub command: Command,
    /// Headers not lifted into typed fields. This is exactly what was
    /// serialized into the command's header section.
    pub residual: HeaderMap,
}

/// Builds a command from `headers` without modifying them.
pub fn to_command(headers: &HeaderMap) -> Result<Mapped, ProtocolError> {
    let mut residual = headers.clone();

    let protocol = take_u8(&mut residual, FrameField::Protocol)?;
    let cmd_type = take_u8(&mut residual, FrameField::CmdType)?;
    let cmd_code = require(&mut residual, FrameField::CmdCode)?;
    let cmd_code = typed(FrameField::CmdCode, cmd_code, FieldValue::as_i16)?;
    let version = take_u8(&mut residual, FrameField::Version)?;
    let request_id = require(&mut residual, FrameField::RequestId)?;
    let request_id = typed(FrameField::RequestId, request_id, FieldValue::as_u32)?;
    let codec = take_u8(&mut residual, FrameField::Codec)?;

    // Lengths are always recomputed from the sections; the values are only
    // validated and consumed.
    for field in [
        FrameField::ClassLength,
        FrameField::HeaderLength,
        FrameField::ContentLength,
    ] {
        take(&mut residual, field)?;
    }

    let family = CommandFamily::from_cmd_code(cmd_code)?;
    // the decoder picks its layout from cmdType alone
    if FrameLayout::for_cmd_type(cmd_type).is_request() != (family == CommandFamily::Request) {
        return Err(ProtocolError::MalformedHeaderValue {
            field: FrameField::CmdType.name(),
            value: cmd_type.to_string(),
        });
    }

    let class = match take_raw(&mut residual, CLASS_NAME_KEY) {
        Some(name) => serialize::encode_class_name(&name),
        None => Default::default(),
    };

    let command = match family {
        CommandFamily::Request => {
            let timeout = require(&mut residual, FrameField::Timeout)?;
            let timeout = typed(FrameField::Timeout, timeout, FieldValue::as_u32)?;
            let header = serialize::encode_header_map(&residual)?;
            Command::Request(RequestCommand {
                common: CommandHeader {
                    protocol,
                    cmd_type,
                    cmd_code,
                    version,
                    request_id,
                    codec,
                    class,
                    header,
                    content: Default::default(),
                },
                timeout,
                arrive_time: None,
            })
        }
        CommandFamily::Response => {
            let status = require(&mut residual, FrameField::ResponseStatus)?;
            let status = typed(FrameField::ResponseStatus, status, FieldValue::as_u16)?;
            let response_time = match take(&mut residual, FrameField::ResponseTimeMillis)? {
                Some(value) => {
                    let millis = typed(FrameField::ResponseTimeMillis, value, FieldValue::as_i64)?;
                    Some(millis_to_time(millis)?)
                }
                None => None,
            };
            let header = serialize::encode_header_map(&residual)?;
            Command::Response(ResponseCommand {
                common: CommandHeader {
                    protocol,
                    cmd_type,
                    cmd_code,
                    version,
                    request_id,
                    codec,
                    class,
                    header,
                    content: Default::default(),
                },
                status,
                response_time,
            })
        }
    };

    Ok(Mapped { command, residual })
}

/// Recovers a header map from a command: the deserialized header section
/// plus every typed field under its bare name.
pub fn to_headers(command: &Command) -> Result<HeaderMap, ProtocolError> {
    let common = command.common();
    let mut headers = serialize::decode_header_map(&common.header)?;

    if !common.class.is_empty() {
        headers.insert(
            CLASS_NAME_KEY.to_string(),
            serialize::decode_class_name(&common.class)?,
        );
    }

    let mut put = |field: FrameField, value: String| {
        headers.insert(field.name().to_string(), value);
    };
    put(FrameField::Protocol, common.protocol.to_string());
    put(FrameField::CmdType, common.cmd_type.to_string());
    put(FrameField::CmdCode, common.cmd_code.to_string());
    put(FrameField::Version, common.version.to_string());
    put(FrameField::RequestId, common.request_id.to_string());
    put(FrameField::Codec, common.codec.to_string());
    put(FrameField::ClassLength, common.class_len().to_string());
    put(FrameField::HeaderLength, common.header_len().to_string());
    put(FrameField::ContentLength, common.content_len().to_string());

    match command {
        Command::Request(r) => put(FrameField::Timeout, r.timeout.to_string()),
        Command::Response(r) => {
            put(FrameField::ResponseStatus, r.status.to_string());
            if let Some(time) = r.response_time {
                put(
                    FrameField::ResponseTimeMillis,
                    time.timestamp_millis().to_string(),
                );
            }
        }
    }

    Ok(headers)
}

fn take_raw(headers: &mut HeaderMap, name: &str) -> Option<String> {
    headers
        .remove(&property_key(name))
        .or_else(|| headers.remove(name))
}

fn take(headers: &mut HeaderMap, field: FrameField) -> Result<Option<FieldValue>, ProtocolError> {
    take_raw(headers, field.name())
        .map(|raw| field.parse(&raw))
        .transpose()
}

fn require(headers: &mut HeaderMap, field: FrameField) -> Result<FieldValue, ProtocolError> {
    take(headers, field)?.ok_or(ProtocolError::MissingField(field.name()))
}

fn take_u8(headers: &mut HeaderMap, field: FrameField) -> Result<u8, ProtocolError> {
    let value = require(headers, field)?;
    typed(field, value, FieldValue::as_u8)
}

fn typed<T>(
    field: FrameField,
    value: FieldValue,
    extract: fn(&FieldValue) -> Option<T>,
) -> Result<T, ProtocolError> {
    extract(&value).ok_or_else(|| ProtocolError::MalformedHeaderValue {
        field: field.name(),
        value: value.to_string(),
    })
}

fn millis_to_time(millis: i64) -> Result<DateTime<Utc>, ProtocolError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ProtocolError::MalformedHeaderValue {
            field: FrameField::ResponseTimeMillis.name(),
            value: millis.to_string(),
        })
}
