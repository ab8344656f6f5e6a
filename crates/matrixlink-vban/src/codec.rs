//! VBAN packet framing.
//!
//! Every datagram starts with a 28-byte header:
//!
//! ```text
//! 0..4    "VBAN"
//! 4       sub-protocol (top 3 bits) | format index (low 5 bits)
//! 5..8    protocol-specific bytes
//! 8..24   stream name, NUL padded
//! 24..28  frame counter, little endian
//! ```
//!
//! Text commands follow the header as raw UTF-8; the datagram length is
//! authoritative, there is no length field. Encoding and decoding are pure.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::endpoint::{STREAM_NAME_LEN, StreamName};
use crate::error::{VbanError, VbanResult};
use crate::telemetry::TelemetryState;

/// Fixed header length shared by all packet kinds.
pub const HEADER_LEN: usize = 28;
/// ASCII magic at the start of every packet.
pub const MAGIC: &[u8; 4] = b"VBAN";

/// Mask selecting the sub-protocol bits of byte 4.
pub const SUB_PROTOCOL_MASK: u8 = 0xE0;
/// Text sub-protocol.
pub const SUB_PROTOCOL_TEXT: u8 = 0x40;
/// Service sub-protocol.
pub const SUB_PROTOCOL_SERVICE: u8 = 0x60;

/// Bit-rate index used for text streams (256 kbps).
pub const TEXT_BPS_INDEX: u8 = 0x12;
/// Text format byte: function/format 0.
pub const TEXT_FORMAT: u8 = 0x00;
/// Text channel byte.
pub const TEXT_CHANNEL: u8 = 0x00;
/// Text stream type: UTF-8.
pub const TEXT_STREAM_UTF8: u8 = 0x10;

/// Service function: request.
pub const SERVICE_FN_REQUEST: u8 = 0x00;
/// Service function: reply.
pub const SERVICE_FN_REPLY: u8 = 0x80;
/// Service type: register for RT-packets.
pub const SERVICE_RT_REGISTER: u8 = 32;
/// Service type: RT-packet carrying engine state.
pub const SERVICE_RT_PACKET: u8 = 33;
/// Service type of text replies.
pub const SERVICE_TEXT_REPLY: u8 = 0x02;
/// Seconds the engine keeps streaming after one registration.
pub const RT_REGISTER_TIMEOUT_SECS: u8 = 15;

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A text command
    Text { stream_name: String, frame_counter: u32, text: String },
    /// A request to receive RT-packets
    RtSubscription { stream_name: String, timeout_secs: u8 },
    /// Real-time engine state
    RtState(Box<TelemetryState>),
    /// Text answer from the engine
    TextReply(String),
}

fn put_header<B: BufMut>(out: &mut B, format: [u8; 4], stream_name: &StreamName, frame_counter: u32) {
    out.put_slice(MAGIC);
    out.put_slice(&format);
    out.put_slice(&stream_name.to_field());
    out.put_u32_le(frame_counter);
}

/// Encode a text command packet.
#[must_use]
pub fn encode_text(stream_name: &StreamName, frame_counter: u32, text: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + text.len());
    put_header(
        &mut out,
        [SUB_PROTOCOL_TEXT | TEXT_BPS_INDEX, TEXT_FORMAT, TEXT_CHANNEL, TEXT_STREAM_UTF8],
        stream_name,
        frame_counter,
    );
    out.put_slice(text.as_bytes());
    out.freeze()
}

/// Encode an RT-packet subscription request. It carries no payload.
#[must_use]
pub fn encode_rt_subscription(stream_name: &StreamName) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN);
    put_header(
        &mut out,
        [SUB_PROTOCOL_SERVICE, SERVICE_FN_REQUEST, SERVICE_RT_REGISTER, RT_REGISTER_TIMEOUT_SECS],
        stream_name,
        0,
    );
    out.freeze()
}

/// Parsed fixed header fields.
struct Header {
    format: [u8; 4],
    stream_name: String,
    frame_counter: u32,
}

impl Header {
    fn parse(buf: &[u8]) -> VbanResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(VbanError::MalformedPacket(format!(
                "{} bytes is shorter than the {HEADER_LEN}-byte header",
                buf.len()
            )));
        }
        if &buf[..4] != MAGIC {
            return Err(VbanError::MalformedPacket("bad magic".to_string()));
        }

        let mut cur = &buf[4..HEADER_LEN];
        let mut format = [0u8; 4];
        cur.copy_to_slice(&mut format);
        let mut name = [0u8; STREAM_NAME_LEN];
        cur.copy_to_slice(&mut name);
        let frame_counter = cur.get_u32_le();

        Ok(Self { format, stream_name: trim_nul(&name), frame_counter })
    }

    fn sub_protocol(&self) -> u8 {
        self.format[0] & SUB_PROTOCOL_MASK
    }
}

/// Drop trailing NUL padding and decode the rest as lossy UTF-8.
pub(crate) fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Decode any supported datagram.
///
/// # Errors
/// Returns [`VbanError::MalformedPacket`] if the buffer is shorter than the
/// header, the magic does not match, the markers are not recognised, or the
/// payload does not fit the packet kind.
pub fn decode(buf: &[u8]) -> VbanResult<Packet> {
    let header = Header::parse(buf)?;
    let payload = &buf[HEADER_LEN..];
    let [_, function, service, extra] = header.format;

    match header.sub_protocol() {
        SUB_PROTOCOL_TEXT => {
            let text = std::str::from_utf8(payload)
                .map_err(|e| VbanError::MalformedPacket(format!("text payload: {e}")))?;
            Ok(Packet::Text {
                stream_name: header.stream_name,
                frame_counter: header.frame_counter,
                text: text.to_string(),
            })
        }
        SUB_PROTOCOL_SERVICE => match (function, service) {
            (SERVICE_FN_REQUEST, SERVICE_RT_REGISTER) if payload.is_empty() => {
                Ok(Packet::RtSubscription { stream_name: header.stream_name, timeout_secs: extra })
            }
            (_, SERVICE_RT_REGISTER | SERVICE_RT_PACKET) => {
                Ok(Packet::RtState(Box::new(TelemetryState::decode(payload)?)))
            }
            (SERVICE_FN_REPLY, SERVICE_TEXT_REPLY) => Ok(Packet::TextReply(trim_nul(payload))),
            _ => Err(VbanError::MalformedPacket(format!(
                "unsupported service function 0x{function:02X} type {service}"
            ))),
        },
        other => Err(VbanError::MalformedPacket(format!("unsupported sub-protocol 0x{other:02X}"))),
    }
}

/// Decode a datagram that must be an RT-packet.
///
/// # Errors
/// Returns [`VbanError::MalformedPacket`] if the buffer is not a well-formed
/// RT-packet.
pub fn decode_telemetry(buf: &[u8]) -> VbanResult<TelemetryState> {
    match decode(buf)? {
        Packet::RtState(state) => Ok(*state),
        _ => Err(VbanError::MalformedPacket("not an RT-packet".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    use super::*;
    use crate::telemetry::{TELEMETRY_LEN, label_slot};

    fn stream() -> StreamName {
        StreamName::new("Command1").expect("valid stream name")
    }

    fn rt_packet(function: u8, service: u8, state: &TelemetryState) -> Vec<u8> {
        let mut buf = Vec::new();
        put_header(&mut buf, [SUB_PROTOCOL_SERVICE, function, service, 0], &stream(), 0);
        state.encode(&mut buf);
        buf
    }

    #[test]
    fn test_trim_nul_keeps_interior_bytes() {
        assert_eq!(trim_nul(b"Mic\0\0\0"), "Mic");
        assert_eq!(trim_nul(b"A\0B\0"), "A\0B");
        assert_eq!(trim_nul(&[0u8; 16]), "");
        assert_eq!(trim_nul(&[b'O', 0xFF, 0]), "O\u{FFFD}");
    }

    #[test]
    fn test_text_header_bytes() {
        let packet = encode_text(&stream(), 0x0102_0304, "Command.ResetGrid");

        assert_eq!(&packet[..4], b"VBAN");
        assert_eq!(&packet[4..8], &[0x52, 0x00, 0x00, 0x10]);
        assert_eq!(&packet[8..16], b"Command1");
        assert!(packet[16..24].iter().all(|b| *b == 0));
        assert_eq!(&packet[24..28], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&packet[28..], b"Command.ResetGrid");
    }

    #[test]
    fn test_subscription_header_bytes() {
        let packet = encode_rt_subscription(&stream());

        assert_eq!(packet.len(), HEADER_LEN);
        assert_eq!(&packet[..4], b"VBAN");
        assert_eq!(&packet[4..8], &[0x60, 0x00, 32, 15]);
        assert_eq!(&packet[8..16], b"Command1");
        assert_eq!(&packet[24..28], &[0, 0, 0, 0]);
        assert_eq!(
            decode(&packet).expect("decode"),
            Packet::RtSubscription { stream_name: "Command1".to_string(), timeout_secs: 15 }
        );
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        assert_matches!(decode(&[]), Err(VbanError::MalformedPacket(_)));
        assert_matches!(decode(b"VBAN"), Err(VbanError::MalformedPacket(_)));
        assert_matches!(decode_telemetry(&[0u8; HEADER_LEN - 1]), Err(VbanError::MalformedPacket(_)));
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut packet = encode_text(&stream(), 0, "x").to_vec();
        packet[0] = b'W';
        assert_matches!(decode(&packet), Err(VbanError::MalformedPacket(_)));
    }

    #[test]
    fn test_decode_telemetry_requires_rt_markers() {
        let text = encode_text(&stream(), 0, "hello");
        assert_matches!(decode_telemetry(&text), Err(VbanError::MalformedPacket(_)));

        let unknown = rt_packet(SERVICE_FN_REPLY, 99, &TelemetryState::default());
        assert_matches!(decode_telemetry(&unknown), Err(VbanError::MalformedPacket(_)));

        let mut audio = encode_text(&stream(), 0, "").to_vec();
        audio[4] = 0x00;
        assert_matches!(decode(&audio), Err(VbanError::MalformedPacket(_)));
    }

    #[test]
    fn test_decode_rt_packet() {
        let mut state = TelemetryState { sample_rate: 48_000, ..TelemetryState::default() };
        state.strip_labels[2] = label_slot("Desktop");

        for service in [SERVICE_RT_REGISTER, SERVICE_RT_PACKET] {
            let packet = rt_packet(SERVICE_FN_REPLY, service, &state);
            assert_eq!(packet.len(), HEADER_LEN + TELEMETRY_LEN);

            let decoded = decode_telemetry(&packet).expect("decode");
            assert_eq!(decoded.sample_rate, 48_000);
            assert_eq!(decoded.strip_label(2).as_deref(), Some("Desktop"));
        }
    }

    #[test]
    fn test_decode_truncated_rt_packet() {
        let mut packet = rt_packet(SERVICE_FN_REPLY, SERVICE_RT_PACKET, &TelemetryState::default());
        packet.truncate(HEADER_LEN + 100);
        assert_matches!(decode_telemetry(&packet), Err(VbanError::MalformedPacket(_)));
    }

    #[test]
    fn test_decode_text_reply() {
        let mut packet = Vec::new();
        put_header(&mut packet, [SUB_PROTOCOL_SERVICE, SERVICE_FN_REPLY, SERVICE_TEXT_REPLY, 0], &stream(), 0);
        packet.extend_from_slice(b"Strip[0].Gain = -3.0;\0\0\0");

        assert_eq!(decode(&packet).expect("decode"), Packet::TextReply("Strip[0].Gain = -3.0;".to_string()));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8_text() {
        let mut packet = encode_text(&stream(), 0, "").to_vec();
        packet.extend_from_slice(&[0xFF, 0xFE]);
        assert_matches!(decode(&packet), Err(VbanError::MalformedPacket(_)));
    }

    proptest! {
        #[test]
        fn prop_text_round_trip(name in "[A-Za-z0-9 _-]{0,16}", counter in any::<u32>(), text in ".*") {
            let stream_name = StreamName::new(name.clone()).expect("valid stream name");
            let packet = encode_text(&stream_name, counter, &text);

            prop_assert_eq!(packet.len(), HEADER_LEN + text.len());
            let decoded = decode(&packet).expect("decode");
            prop_assert_eq!(
                decoded,
                Packet::Text { stream_name: name.trim_end_matches('\0').to_string(), frame_counter: counter, text }
            );
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let _ = decode(&bytes);
        }
    }
}
