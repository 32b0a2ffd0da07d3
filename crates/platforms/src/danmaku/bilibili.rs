//! Bilibili (哔哩哔哩) danmaku protocol.
//!
//! Binary framing, big-endian header fields:
//!
//! ```text
//! | total length (4) | header length (2) | version (2) | operation (4) | sequence (4) | payload |
//! ```
//!
//! MESSAGE payloads are zlib streams containing further frames in the same
//! format; chat text lives in `DANMU_MSG` notifications.

use std::io::Read;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use serde::Serialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;

use super::error::{DanmakuError, Result};
use super::{Danmaku, DanmuProtocol};
use crate::extractor::PlatformKind;

/// Chat endpoint.
const CHAT_URL: &str = "wss://broadcastlv.chat.bilibili.com/sub";

const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Frame header length in bytes.
const HEADER_LEN: usize = 16;

/// Chat message color; the upstream does not carry one per message.
const CHAT_COLOR: &str = "#ffffff";

/// Operation codes.
mod op {
    pub const HEARTBEAT: u32 = 2;
    pub const HEARTBEAT_REPLY: u32 = 3;
    pub const MESSAGE: u32 = 5;
    pub const USER_AUTH: u32 = 7;
    pub const CONNECT_OK: u32 = 8;
}

/// Heartbeat frame (operation = 2, empty payload).
const HEARTBEAT: &[u8] = &[
    0x00, 0x00, 0x00, 0x10, // total length = 16
    0x00, 0x10, // header length = 16
    0x00, 0x01, // version = 1
    0x00, 0x00, 0x00, 0x02, // operation = 2 (heartbeat)
    0x00, 0x00, 0x00, 0x01, // sequence = 1
];

/// Authentication payload sent as the first frame.
#[derive(Debug, Serialize)]
struct AuthData {
    clientver: &'static str,
    platform: &'static str,
    protover: u8,
    roomid: u64,
    uid: u64,
    #[serde(rename = "type")]
    auth_type: u8,
}

/// Bilibili danmaku protocol implementation.
pub struct BilibiliDanmuProtocol {
    room_id: u64,
}

impl BilibiliDanmuProtocol {
    pub fn new(room_id: u64) -> Self {
        Self { room_id }
    }

    fn build_auth_packet(&self) -> Bytes {
        let auth_data = AuthData {
            clientver: "1.6.3",
            platform: "web",
            protover: 2,
            roomid: self.room_id,
            uid: 0,
            auth_type: 2,
        };

        let json_data = serde_json::to_vec(&auth_data).unwrap();
        Bytes::from(build_packet(&json_data, op::USER_AUTH))
    }
}

impl DanmuProtocol for BilibiliDanmuProtocol {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Bilibili
    }

    fn room_id(&self) -> u64 {
        self.room_id
    }

    fn websocket_url(&self) -> String {
        CHAT_URL.to_string()
    }

    fn handshake_messages(&self) -> Result<Vec<Message>> {
        Ok(vec![Message::Binary(self.build_auth_packet())])
    }

    fn heartbeat_message(&self) -> Message {
        Message::Binary(Bytes::from_static(HEARTBEAT))
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
    }

    fn decode(&self, payload: &[u8], _acc: &mut Vec<u8>) -> Result<Vec<Danmaku>> {
        if payload.len() < HEADER_LEN {
            return Err(DanmakuError::protocol(format!(
                "frame shorter than header: {} bytes",
                payload.len()
            )));
        }

        let operation = BigEndian::read_u32(&payload[8..12]);
        match operation {
            op::HEARTBEAT_REPLY => {
                if payload.len() >= HEADER_LEN + 4 {
                    debug!(
                        popularity = BigEndian::read_u32(&payload[HEADER_LEN..HEADER_LEN + 4]),
                        "heartbeat reply"
                    );
                }
                Ok(Vec::new())
            }
            op::CONNECT_OK => {
                debug!(
                    body = %String::from_utf8_lossy(&payload[HEADER_LEN..]),
                    "connect reply"
                );
                Ok(Vec::new())
            }
            op::MESSAGE => {
                let body = &payload[HEADER_LEN..];
                // The upstream occasionally sends uncompressed frames; skip
                // them instead of tearing the room down.
                if !has_zlib_header(body) {
                    return Ok(Vec::new());
                }
                let inflated = decompress_zlib(body)?;
                Ok(split_frames(&inflated)
                    .into_iter()
                    .filter_map(parse_danmu)
                    .collect())
            }
            other => Err(DanmakuError::protocol(format!(
                "unsupported operation {other}"
            ))),
        }
    }
}

/// Build a frame with the given payload and operation code.
fn build_packet(payload: &[u8], operation: u32) -> Vec<u8> {
    let total_len = HEADER_LEN + payload.len();
    let mut packet = Vec::with_capacity(total_len);

    packet.extend_from_slice(&(total_len as u32).to_be_bytes()); // total length
    packet.extend_from_slice(&(HEADER_LEN as u16).to_be_bytes()); // header length
    packet.extend_from_slice(&1u16.to_be_bytes()); // version
    packet.extend_from_slice(&operation.to_be_bytes()); // operation
    packet.extend_from_slice(&1u32.to_be_bytes()); // sequence

    packet.extend_from_slice(payload);
    packet
}

/// Walk a buffer of concatenated frames, yielding each frame's payload.
fn split_frames(data: &[u8]) -> Vec<&[u8]> {
    let mut payloads = Vec::new();
    let mut offset = 0;

    while offset + HEADER_LEN <= data.len() {
        let total_len = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
        if total_len < HEADER_LEN || offset + total_len > data.len() {
            break;
        }
        payloads.push(&data[offset + HEADER_LEN..offset + total_len]);
        offset += total_len;
    }

    payloads
}

/// RFC 1950: compression method 8 and a header checksum divisible by 31.
fn has_zlib_header(data: &[u8]) -> bool {
    data.len() >= 2
        && data[0] & 0x0f == 8
        && ((u16::from(data[0]) << 8) | u16::from(data[1])) % 31 == 0
}

fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Extract chat text from a notification payload; `info[1]` is the content.
fn parse_danmu(body: &[u8]) -> Option<Danmaku> {
    let json: Value = serde_json::from_slice(body).ok()?;
    if json.get("cmd")?.as_str()? != "DANMU_MSG" {
        return None;
    }
    let text = json.get("info")?.as_array()?.get(1)?.as_str()?;
    Some(Danmaku::chat(text, CHAT_COLOR))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    use super::*;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_build_packet_header() {
        let packet = build_packet(b"test", op::USER_AUTH);

        assert_eq!(BigEndian::read_u32(&packet[0..4]), 20); // 16 + 4
        assert_eq!(BigEndian::read_u16(&packet[4..6]), 16);
        assert_eq!(BigEndian::read_u16(&packet[6..8]), 1);
        assert_eq!(BigEndian::read_u32(&packet[8..12]), op::USER_AUTH);
        assert_eq!(BigEndian::read_u32(&packet[12..16]), 1);
        assert_eq!(&packet[16..], b"test");
    }

    #[test]
    fn test_build_heartbeat_matches_constant() {
        assert_eq!(build_packet(&[], op::HEARTBEAT), HEARTBEAT);
    }

    #[test]
    fn test_split_frames_round_trip() {
        for operation in [op::HEARTBEAT, op::USER_AUTH] {
            let packet = build_packet(b"payload", operation);
            assert_eq!(split_frames(&packet), vec![b"payload".as_slice()]);
        }
    }

    #[test]
    fn test_split_frames_concatenated() {
        let mut buffer = build_packet(b"first", op::MESSAGE);
        buffer.extend_from_slice(&build_packet(b"second", op::MESSAGE));

        assert_eq!(
            split_frames(&buffer),
            vec![b"first".as_slice(), b"second".as_slice()]
        );
    }

    #[test]
    fn test_split_frames_truncated_tail_is_dropped() {
        let mut buffer = build_packet(b"whole", op::MESSAGE);
        let partial = build_packet(b"partial", op::MESSAGE);
        buffer.extend_from_slice(&partial[..partial.len() - 3]);

        assert_eq!(split_frames(&buffer), vec![b"whole".as_slice()]);
    }

    #[test]
    fn test_auth_packet_payload() {
        let protocol = BilibiliDanmuProtocol::new(92613);
        let packet = protocol.build_auth_packet();

        assert_eq!(BigEndian::read_u32(&packet[8..12]), op::USER_AUTH);
        let json: Value = serde_json::from_slice(&packet[16..]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "clientver": "1.6.3",
                "platform": "web",
                "protover": 2,
                "roomid": 92613,
                "uid": 0,
                "type": 2
            })
        );
    }

    #[test]
    fn test_decode_message_extracts_chat_only() {
        // Two back-to-back frames inside one zlib stream; only DANMU_MSG
        // produces a chat message.
        let chat = serde_json::json!({"cmd": "DANMU_MSG", "info": ["meta", "hello", [1, "user"]]});
        let gift = serde_json::json!({"cmd": "SEND_GIFT"});
        let mut inner = build_packet(&serde_json::to_vec(&chat).unwrap(), op::MESSAGE);
        inner.extend_from_slice(&build_packet(
            &serde_json::to_vec(&gift).unwrap(),
            op::MESSAGE,
        ));

        let frame = build_packet(&deflate(&inner), op::MESSAGE);

        let protocol = BilibiliDanmuProtocol::new(5);
        let mut acc = Vec::new();
        let items = protocol.decode(&frame, &mut acc).unwrap();

        assert_eq!(items, vec![Danmaku::chat("hello", "#ffffff")]);
    }

    #[test]
    fn test_decode_message_with_invalid_zlib_header_is_empty() {
        let frame = build_packet(b"not zlib at all", op::MESSAGE);

        let protocol = BilibiliDanmuProtocol::new(5);
        let mut acc = Vec::new();
        assert_eq!(protocol.decode(&frame, &mut acc).unwrap(), vec![]);
    }

    #[test]
    fn test_decode_heartbeat_reply_and_connect_ok_are_silent() {
        let protocol = BilibiliDanmuProtocol::new(5);
        let mut acc = Vec::new();

        let reply = build_packet(&1024u32.to_be_bytes(), op::HEARTBEAT_REPLY);
        assert_eq!(protocol.decode(&reply, &mut acc).unwrap(), vec![]);

        let ok = build_packet(br#"{"code":0}"#, op::CONNECT_OK);
        assert_eq!(protocol.decode(&ok, &mut acc).unwrap(), vec![]);
    }

    #[test]
    fn test_decode_corrupt_zlib_stream_is_io_error() {
        // Valid zlib header (0x789c) followed by an invalid deflate block;
        // unlike a missing header this must stay fatal.
        let mut body = vec![0x78, 0x9c];
        body.extend_from_slice(&[0xff; 8]);
        let frame = build_packet(&body, op::MESSAGE);

        let protocol = BilibiliDanmuProtocol::new(5);
        let mut acc = Vec::new();
        assert!(matches!(
            protocol.decode(&frame, &mut acc),
            Err(DanmakuError::Io(_))
        ));
    }

    #[test]
    fn test_decode_unknown_operation_is_fatal() {
        let frame = build_packet(&[], 42);

        let protocol = BilibiliDanmuProtocol::new(5);
        let mut acc = Vec::new();
        assert!(matches!(
            protocol.decode(&frame, &mut acc),
            Err(DanmakuError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_short_frame_is_fatal() {
        let protocol = BilibiliDanmuProtocol::new(5);
        let mut acc = Vec::new();
        assert!(protocol.decode(&[0, 1, 2], &mut acc).is_err());
    }
}
