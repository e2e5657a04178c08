//! Encoder and decoder for Bolt v1 frames.
//!
//! Both are stateless: the decoder re-parses from the start of whatever it
//! is given, so it can be called again as more bytes arrive on the same
//! connection. Keeping and growing the buffer is the caller's job.

use crate::command::{Command, CommandHeader, RequestCommand, ResponseCommand};
use crate::error::ProtocolError;
use crate::field::FrameField;
use crate::layout::FrameLayout;
use crate::mapper::{self, HeaderMap};
use crate::{DEFAULT_MAX_FRAME_SIZE, MIN_DISCRIMINANT_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;

/// Encodes commands into frames.
pub struct Encoder;

impl Encoder {
    /// Maps `headers` onto a command and encodes it.
    ///
    /// Returns the command's request id together with the frame so the
    /// caller can register the write against its in-flight transaction.
    pub fn encode_headers(headers: &HeaderMap) -> Result<(u32, BytesMut), ProtocolError> {
        let mapped = mapper::to_command(headers)?;
        let buf = Self::encode_command(&mapped.command)?;
        Ok((mapped.command.request_id(), buf))
    }

    /// Encodes a command: fixed header, then class, header and content.
    pub fn encode_command(command: &Command) -> Result<BytesMut, ProtocolError> {
        let common = command.common();
        if FrameLayout::for_cmd_type(common.cmd_type).is_request() != command.is_request() {
            return Err(ProtocolError::MalformedHeaderValue {
                field: FrameField::CmdType.name(),
                value: common.cmd_type.to_string(),
            });
        }
        check_len("class", common.class_len(), u16::MAX as u64)?;
        check_len("header", common.header_len(), u16::MAX as u64)?;
        check_len("content", common.content_len(), u32::MAX as u64)?;

        let layout = command.layout();
        let total =
            layout.header_len + common.class_len() + common.header_len() + common.content_len();
        let mut buf = BytesMut::with_capacity(total);

        layout.write(&mut buf, |field| command.wire_value(field));
        buf.put_slice(&common.class);
        buf.put_slice(&common.header);
        buf.put_slice(&common.content);

        tracing::trace!(
            request_id = common.request_id,
            variant = layout.name,
            bytes = buf.len(),
            "encoded bolt frame"
        );
        Ok(buf)
    }

    /// Body data is folded into the content section at encode time, so
    /// data frames pass through unchanged.
    pub fn encode_data(data: Bytes) -> Bytes {
        data
    }

    /// Trailers are not supported by this protocol version.
    pub fn encode_trailers(_trailers: &HeaderMap) -> Option<BytesMut> {
        None
    }
}

fn check_len(section: &'static str, len: usize, max: u64) -> Result<(), ProtocolError> {
    if len as u64 > max {
        return Err(ProtocolError::FrameLengthInconsistency {
            section,
            length: len as u64,
            max,
        });
    }
    Ok(())
}

/// Parsed fixed header of a complete frame.
struct FrameHead {
    layout: &'static FrameLayout,
    class_len: usize,
    header_len: usize,
    content_len: usize,
}

impl FrameHead {
    fn total_len(&self) -> usize {
        self.layout.header_len + self.class_len + self.header_len + self.content_len
    }
}

/// Decodes frames from an accumulating buffer.
#[derive(Debug, Clone)]
pub struct Decoder {
    max_frame_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Creates a decoder that rejects frames larger than `max_frame_size`.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` if more data is needed, or the number of bytes
    /// the frame occupies together with the command. `buf` is not modified;
    /// sections are copied out of it.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(usize, Command)>, ProtocolError> {
        let head = match self.parse_head(buf)? {
            Some(head) => head,
            None => return Ok(None),
        };
        let total = head.total_len();
        let frame = Bytes::copy_from_slice(&buf[..total]);
        let command = build_command(&head, frame);
        Ok(Some((total, command)))
    }

    /// Attempts to decode one frame, splitting it off the front of `buf`.
    ///
    /// Sections share the buffer's allocation. Bytes after the frame stay
    /// in `buf`; on `Ok(None)` nothing is consumed.
    pub fn decode_buf(&self, buf: &mut BytesMut) -> Result<Option<Command>, ProtocolError> {
        let head = match self.parse_head(&buf[..])? {
            Some(head) => head,
            None => return Ok(None),
        };
        let frame = buf.split_to(head.total_len()).freeze();
        Ok(Some(build_command(&head, frame)))
    }

    fn parse_head(&self, buf: &[u8]) -> Result<Option<FrameHead>, ProtocolError> {
        if buf.len() < MIN_DISCRIMINANT_LEN {
            return Ok(None);
        }

        let layout = FrameLayout::for_cmd_type(buf[1]);
        if buf.len() < layout.header_len {
            tracing::trace!(
                available = buf.len(),
                needed = layout.header_len,
                "incomplete {} header",
                layout.name
            );
            return Ok(None);
        }

        let class_len = read(layout, buf, FrameField::ClassLength) as usize;
        let header_len = read(layout, buf, FrameField::HeaderLength) as usize;
        let content_len = usize::try_from(read(layout, buf, FrameField::ContentLength))
            .map_err(|_| ProtocolError::FrameLengthInconsistency {
                section: "content",
                length: read(layout, buf, FrameField::ContentLength),
                max: usize::MAX as u64,
            })?;

        let total = layout
            .header_len
            .checked_add(class_len)
            .and_then(|n| n.checked_add(header_len))
            .and_then(|n| n.checked_add(content_len))
            .ok_or(ProtocolError::FrameLengthInconsistency {
                section: "frame",
                length: u64::MAX,
                max: usize::MAX as u64,
            })?;

        if total > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: self.max_frame_size,
            });
        }

        if buf.len() < total {
            tracing::trace!(
                available = buf.len(),
                needed = total,
                "not enough data for a full {} frame",
                layout.name
            );
            return Ok(None);
        }

        Ok(Some(FrameHead {
            layout,
            class_len,
            header_len,
            content_len,
        }))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a fixed field the layout is known to carry from a buffer at least
/// `header_len` long.
fn read(layout: &FrameLayout, buf: &[u8], field: FrameField) -> u64 {
    layout.read(buf, field).unwrap_or_default()
}

/// Builds the command from a frame of exactly `head.total_len()` bytes.
fn build_command(head: &FrameHead, frame: Bytes) -> Command {
    let layout = head.layout;
    let class_start = layout.header_len;
    let header_start = class_start + head.class_len;
    let content_start = header_start + head.header_len;

    let common = CommandHeader {
        protocol: read(layout, &frame, FrameField::Protocol) as u8,
        cmd_type: read(layout, &frame, FrameField::CmdType) as u8,
        cmd_code: read(layout, &frame, FrameField::CmdCode) as u16 as i16,
        version: read(layout, &frame, FrameField::Version) as u8,
        request_id: read(layout, &frame, FrameField::RequestId) as u32,
        codec: read(layout, &frame, FrameField::Codec) as u8,
        class: frame.slice(class_start..header_start),
        header: frame.slice(header_start..content_start),
        content: frame.slice(content_start..content_start + head.content_len),
    };

    let command = if layout.is_request() {
        Command::Request(RequestCommand {
            timeout: read(layout, &frame, FrameField::Timeout) as u32,
            common,
            arrive_time: Some(Utc::now()),
        })
    } else {
        Command::Response(ResponseCommand {
            status: read(layout, &frame, FrameField::ResponseStatus) as u16,
            common,
            response_time: Some(Utc::now()),
        })
    };

    tracing::trace!(
        request_id = command.request_id(),
        variant = layout.name,
        bytes = frame.len(),
        "decoded bolt frame"
    );
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FrameField;
    use crate::mapper::to_headers;
    use crate::{cmd_code, cmd_type, PROTOCOL_CODE_V1};
    use proptest::prelude::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn example_request_headers() -> HeaderMap {
        headers(&[
            ("protocol", "1"),
            ("cmdType", "0"),
            ("cmdCode", "1"),
            ("version", "1"),
            ("requestId", "42"),
            ("codec", "1"),
            ("timeout", "3000"),
        ])
    }

    fn request(request_id: u32, content: &'static [u8]) -> Command {
        Command::Request(RequestCommand {
            common: CommandHeader {
                protocol: PROTOCOL_CODE_V1,
                cmd_type: cmd_type::REQUEST,
                cmd_code: cmd_code::RPC_REQUEST,
                version: 1,
                request_id,
                codec: 1,
                class: Bytes::from_static(b"com.example.Req"),
                header: Bytes::new(),
                content: Bytes::from_static(content),
            },
            timeout: 1000,
            arrive_time: None,
        })
    }

    fn response(request_id: u32, status: u16, content: &'static [u8]) -> Command {
        Command::Response(ResponseCommand {
            common: CommandHeader {
                protocol: PROTOCOL_CODE_V1,
                cmd_type: cmd_type::RESPONSE,
                cmd_code: cmd_code::RPC_RESPONSE,
                version: 1,
                request_id,
                codec: 1,
                class: Bytes::new(),
                header: Bytes::new(),
                content: Bytes::from_static(content),
            },
            status,
            response_time: None,
        })
    }

    /// Clears decode-time timestamps so commands compare by wire fields.
    fn strip_time(command: Command) -> Command {
        match command {
            Command::Request(mut r) => {
                r.arrive_time = None;
                Command::Request(r)
            }
            Command::Response(mut r) => {
                r.response_time = None;
                Command::Response(r)
            }
        }
    }

    #[test]
    fn test_example_request_bytes() {
        let (id, encoded) = Encoder::encode_headers(&example_request_headers()).unwrap();
        assert_eq!(id, 42);
        assert_eq!(encoded.len(), 22);
        assert_eq!(encoded[0], 1);
        assert_eq!(encoded[1], cmd_type::REQUEST);
        assert_eq!(&encoded[2..4], &[0x00, 0x01]);
        assert_eq!(&encoded[5..9], &[0x00, 0x00, 0x00, 0x2A]);
        assert_eq!(&encoded[10..14], &3000u32.to_be_bytes());
        assert_eq!(&encoded[14..22], &[0u8; 8]);
    }

    #[test]
    fn test_example_request_partial_then_full() {
        let (_, encoded) = Encoder::encode_headers(&example_request_headers()).unwrap();
        let decoder = Decoder::new();

        assert!(decoder.decode(&encoded[..21]).unwrap().is_none());

        let (consumed, command) = decoder.decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, 22);
        assert_eq!(command.request_id(), 42);
        match command {
            Command::Request(r) => {
                assert_eq!(r.timeout, 3000);
                assert!(r.arrive_time.is_some());
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_response_layout_offsets() {
        let encoded = Encoder::encode_command(&response(7, 0x0102, b"ok")).unwrap();
        assert_eq!(encoded.len(), 22);
        assert_eq!(&encoded[10..12], &[0x01, 0x02]);
        assert_eq!(&encoded[16..20], &[0, 0, 0, 2]);
        assert_eq!(&encoded[20..], b"ok");
    }

    #[test]
    fn test_request_carries_content() {
        let cmd = request(5, b"payload");
        let encoded = Encoder::encode_command(&cmd).unwrap();
        assert_eq!(encoded.len(), 22 + 15 + 7);
        let (_, decoded) = Decoder::new().decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.common().content.as_ref(), b"payload");
    }

    #[test]
    fn test_decode_buf_leaves_trailing_bytes() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Encoder::encode_command(&request(1, b"a")).unwrap());
        buf.extend_from_slice(&Encoder::encode_command(&response(1, 0, b"b")).unwrap());
        buf.extend_from_slice(&[0x01]);

        let decoder = Decoder::new();
        let first = decoder.decode_buf(&mut buf).unwrap().unwrap();
        assert!(first.is_request());
        let second = decoder.decode_buf(&mut buf).unwrap().unwrap();
        assert!(!second.is_request());
        assert_eq!(second.common().content.as_ref(), b"b");

        assert!(decoder.decode_buf(&mut buf).unwrap().is_none());
        assert_eq!(buf.as_ref(), &[0x01]);
    }

    #[test]
    fn test_decode_does_not_touch_buffer() {
        let encoded = Encoder::encode_command(&request(3, b"xyz")).unwrap();
        let mut data = encoded.to_vec();
        data.extend_from_slice(b"trailing");
        let snapshot = data.clone();

        let (consumed, _) = Decoder::new().decode(&data).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(data, snapshot);
    }

    #[test]
    fn test_max_u32_request_id() {
        let cmd = response(u32::MAX, 0, b"");
        let encoded = Encoder::encode_command(&cmd).unwrap();
        assert_eq!(&encoded[5..9], &[0xFF; 4]);
        let (_, decoded) = Decoder::new().decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.request_id(), u32::MAX);
    }

    #[test]
    fn test_negative_cmd_code_roundtrip() {
        let mut cmd = request(1, b"");
        if let Command::Request(r) = &mut cmd {
            r.common.cmd_code = -1;
        }
        let encoded = Encoder::encode_command(&cmd).unwrap();
        let (_, decoded) = Decoder::new().decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.cmd_code(), -1);
    }

    #[test]
    fn test_empty_content() {
        let encoded = Encoder::encode_command(&response(9, 0, b"")).unwrap();
        assert_eq!(encoded.len(), 20);
        assert_eq!(&encoded[16..20], &[0; 4]);
        let (_, decoded) = Decoder::new().decode(&encoded).unwrap().unwrap();
        assert!(decoded.common().content.is_empty());
    }

    #[test]
    fn test_unknown_cmd_type_takes_response_branch() {
        let mut encoded = Encoder::encode_command(&response(4, 1, b"")).unwrap();
        encoded[1] = 0x7F;
        let (consumed, decoded) = Decoder::new().decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, 20);
        assert!(!decoded.is_request());
        assert_eq!(decoded.cmd_type(), 0x7F);
    }

    #[test]
    fn test_oneway_takes_request_branch() {
        let mut cmd = request(8, b"");
        if let Command::Request(r) = &mut cmd {
            r.common.cmd_type = cmd_type::REQUEST_ONEWAY;
        }
        let encoded = Encoder::encode_command(&cmd).unwrap();
        let (_, decoded) = Decoder::new().decode(&encoded).unwrap().unwrap();
        assert!(decoded.is_oneway());
    }

    #[test]
    fn test_frame_too_large() {
        let mut header = vec![0u8; 22];
        header[1] = cmd_type::REQUEST;
        header[18..22].copy_from_slice(&u32::MAX.to_be_bytes());

        let result = Decoder::new().decode(&header);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));

        let small = Decoder::with_max_frame_size(64);
        header[18..22].copy_from_slice(&43u32.to_be_bytes());
        assert!(matches!(
            small.decode(&header),
            Err(ProtocolError::FrameTooLarge { size: 65, max: 64 })
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_class() {
        let mut cmd = request(1, b"");
        if let Command::Request(r) = &mut cmd {
            r.common.class = Bytes::from(vec![b'x'; u16::MAX as usize + 1]);
        }
        let result = Encoder::encode_command(&cmd);
        assert!(matches!(
            result,
            Err(ProtocolError::FrameLengthInconsistency { section: "class", .. })
        ));
    }

    #[test]
    fn test_encode_rejects_cmd_type_of_other_variant() {
        let mut cmd = request(3, b"");
        if let Command::Request(r) = &mut cmd {
            r.common.cmd_type = cmd_type::RESPONSE;
        }
        assert!(matches!(
            Encoder::encode_command(&cmd),
            Err(ProtocolError::MalformedHeaderValue { field: "cmdType", .. })
        ));

        // a request code under a response type would be read back with the
        // 20-byte layout and never complete
        let mut h = example_request_headers();
        h.insert("cmdType".into(), cmd_type::RESPONSE.to_string());
        h.insert("className".into(), "abc".into());
        assert!(matches!(
            Encoder::encode_headers(&h),
            Err(ProtocolError::MalformedHeaderValue { field: "cmdType", .. })
        ));
    }

    #[test]
    fn test_encode_headers_errors_are_typed() {
        let mut h = example_request_headers();
        h.insert("cmdCode".into(), "9".into());
        assert!(matches!(
            Encoder::encode_headers(&h),
            Err(ProtocolError::UnsupportedCommandCode(9))
        ));

        let mut h = example_request_headers();
        h.insert("requestId".into(), "forty-two".into());
        assert!(matches!(
            Encoder::encode_headers(&h),
            Err(ProtocolError::MalformedHeaderValue { field: "requestId", .. })
        ));
    }

    #[test]
    fn test_unrecognized_header_survives_roundtrip() {
        let mut h = example_request_headers();
        h.insert("x-trace-id".into(), "abc123".into());
        h.insert(FrameField::Codec.property_key(), "2".into());

        let (_, encoded) = Encoder::encode_headers(&h).unwrap();
        let (_, decoded) = Decoder::new().decode(&encoded).unwrap().unwrap();

        let section = crate::serialize::decode_header_map(&decoded.common().header).unwrap();
        assert_eq!(section.get("x-trace-id").map(String::as_str), Some("abc123"));

        let restored = to_headers(&decoded).unwrap();
        assert_eq!(restored.get("codec").map(String::as_str), Some("2"));
        assert_eq!(restored.get("x-trace-id").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn test_data_and_trailers() {
        let data = Bytes::from_static(b"body");
        assert_eq!(Encoder::encode_data(data.clone()), data);
        assert!(Encoder::encode_trailers(&HeaderMap::new()).is_none());
    }

    fn arb_section(max: usize) -> impl Strategy<Value = Bytes> {
        proptest::collection::vec(any::<u8>(), 0..max).prop_map(Bytes::from)
    }

    prop_compose! {
        fn arb_common(cmd_type: u8, cmd_code: i16)(
            protocol in any::<u8>(),
            version in any::<u8>(),
            request_id in any::<u32>(),
            codec in any::<u8>(),
            class in arb_section(64),
            header in arb_section(64),
            content in arb_section(256),
        ) -> CommandHeader {
            CommandHeader {
                protocol,
                cmd_type,
                cmd_code,
                version,
                request_id,
                codec,
                class,
                header,
                content,
            }
        }
    }

    fn arb_command() -> impl Strategy<Value = Command> {
        prop_oneof![
            (
                prop_oneof![Just(cmd_type::REQUEST), Just(cmd_type::REQUEST_ONEWAY)],
                any::<i16>()
            )
                .prop_flat_map(|(t, c)| (arb_common(t, c), any::<u32>()))
                .prop_map(|(common, timeout)| Command::Request(RequestCommand {
                    common,
                    timeout,
                    arrive_time: None,
                })),
            (
                any::<u8>().prop_filter("response type", |t| *t != cmd_type::REQUEST
                    && *t != cmd_type::REQUEST_ONEWAY),
                any::<i16>()
            )
                .prop_flat_map(|(t, c)| (arb_common(t, c), any::<u16>()))
                .prop_map(|(common, status)| Command::Response(ResponseCommand {
                    common,
                    status,
                    response_time: None,
                })),
        ]
    }

    proptest! {
        #[test]
        fn prop_encode_decode_preserves_fields(cmd in arb_command()) {
            let encoded = Encoder::encode_command(&cmd).unwrap();
            let (consumed, decoded) = Decoder::new().decode(&encoded).unwrap().unwrap();
            prop_assert_eq!(consumed, encoded.len());
            prop_assert_eq!(strip_time(decoded), cmd);
        }

        #[test]
        fn prop_every_prefix_is_not_ready(cmd in arb_command(), trailing in arb_section(16)) {
            let encoded = Encoder::encode_command(&cmd).unwrap();
            let decoder = Decoder::new();
            for len in 0..encoded.len() {
                prop_assert!(decoder.decode(&encoded[..len]).unwrap().is_none());
            }

            let mut buf = encoded.clone();
            buf.extend_from_slice(&trailing);
            let decoded = decoder.decode_buf(&mut buf).unwrap().unwrap();
            prop_assert_eq!(strip_time(decoded), cmd);
            prop_assert_eq!(buf.freeze(), trailing);
        }
    }
}
