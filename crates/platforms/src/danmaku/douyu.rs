//! Douyu (斗鱼) danmaku protocol.
//!
//! STT (Serialized Text Transport) payloads in little-endian binary frames:
//!
//! ```text
//! | length (4 LE) | length (4 LE) | magic (4) | STT payload | 0x00 |
//! ```
//!
//! The length field is `payload + 9` and is duplicated. One transport
//! message may carry several logical frames and one logical frame may span
//! several transport messages, so raw bytes are accumulated until the buffer
//! ends with the null terminator before any parsing happens.
//!
//! STT format rules: key-value pairs are joined with `@=` and terminated by
//! `/`; `@` escapes as `@A` and `/` as `@S`.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;

use super::error::Result;
use super::{Danmaku, DanmuProtocol};
use crate::extractor::PlatformKind;

/// Chat endpoint.
const CHAT_URL: &str = "wss://danmuproxy.douyu.com:8502/";

/// Douyu requires a keep-alive every 45 seconds.
const HEARTBEAT_INTERVAL_SECS: u64 = 45;

/// Server-side group aggregating all chat traffic for a room.
const FIREHOSE_GROUP_ID: i32 = -9999;

/// Chat message color; the relay does not map Douyu's palette codes.
const CHAT_COLOR: &str = "#fff";

/// Magic number for client → server messages.
const CLIENT_MAGIC: [u8; 4] = [0xb1, 0x02, 0x00, 0x00];

/// Heartbeat packet: type@=mrkl/
const HEARTBEAT: &[u8] = &[
    0x14, 0x00, 0x00, 0x00, // length = 20
    0x14, 0x00, 0x00, 0x00, // length = 20
    0xb1, 0x02, 0x00, 0x00, // magic
    0x74, 0x79, 0x70, 0x65, 0x40, 0x3d, 0x6d, 0x72, 0x6b, 0x6c, 0x2f, 0x00, // type@=mrkl/\0
];

/// Douyu danmaku protocol implementation.
pub struct DouyuDanmuProtocol {
    room_id: u64,
}

impl DouyuDanmuProtocol {
    pub fn new(room_id: u64) -> Self {
        Self { room_id }
    }
}

impl DanmuProtocol for DouyuDanmuProtocol {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Douyu
    }

    fn room_id(&self) -> u64 {
        self.room_id
    }

    fn websocket_url(&self) -> String {
        CHAT_URL.to_string()
    }

    fn handshake_messages(&self) -> Result<Vec<Message>> {
        let login = format!("type@=loginreq/roomid@={}/", self.room_id);
        let join_group = format!(
            "type@=joingroup/rid@={}/gid@={}/",
            self.room_id, FIREHOSE_GROUP_ID
        );
        debug!(room_id = self.room_id, "douyu handshake prepared");

        Ok(vec![
            Message::Binary(create_packet(&login)),
            Message::Binary(create_packet(&join_group)),
        ])
    }

    fn heartbeat_message(&self) -> Message {
        Message::Binary(Bytes::from_static(HEARTBEAT))
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
    }

    fn decode(&self, payload: &[u8], acc: &mut Vec<u8>) -> Result<Vec<Danmaku>> {
        acc.extend_from_slice(payload);

        // A logical message boundary is only reached on the null terminator.
        if acc.last() != Some(&0x00) {
            return Ok(Vec::new());
        }

        let items = parse_packets(acc)
            .iter()
            .filter_map(|p| parse_chat(p))
            .collect();
        acc.clear();
        Ok(items)
    }
}

fn parse_chat(payload: &str) -> Option<Danmaku> {
    let fields = stt_decode(payload);
    if fields.get("type").map(String::as_str) != Some("chatmsg") {
        return None;
    }
    let text = fields.get("txt")?;
    Some(Danmaku::chat(text, CHAT_COLOR))
}

/// Escape STT special characters: `@` as `@A` and `/` as `@S`.
pub fn stt_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '@' => result.push_str("@A"),
            '/' => result.push_str("@S"),
            _ => result.push(c),
        }
    }
    result
}

/// Unescape STT special characters: `@A` back to `@` and `@S` back to `/`.
pub fn stt_unescape(s: &str) -> String {
    s.replace("@S", "/").replace("@A", "@")
}

/// Decode an STT-formatted string to a map of key-value pairs.
pub fn stt_decode(data: &str) -> FxHashMap<String, String> {
    let mut map = FxHashMap::default();

    for part in data.split('/') {
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once("@=") {
            map.insert(stt_unescape(key), stt_unescape(value));
        }
    }

    map
}

/// Frame an STT message for sending.
pub fn create_packet(message: &str) -> Bytes {
    let payload = message.as_bytes();
    // length = magic(4) + length2(4) + payload + null(1)
    let length = (payload.len() + 9) as u32;

    let mut buf = BytesMut::with_capacity(payload.len() + 13);
    buf.put_u32_le(length);
    buf.put_u32_le(length);
    buf.put_slice(&CLIENT_MAGIC);
    buf.put_slice(payload);
    buf.put_u8(0x00);

    buf.freeze()
}

/// Parse one frame; returns the payload and the bytes consumed, or None if
/// the buffer does not hold a complete frame.
fn parse_packet(data: &[u8]) -> Option<(String, usize)> {
    // Minimum frame: len1(4) + len2(4) + magic(4) + null(1)
    if data.len() < 13 {
        return None;
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let total_size = length + 4;
    if data.len() < total_size || total_size < 13 {
        return None;
    }

    // Payload sits between the 12-byte header and the null terminator.
    let payload = &data[12..total_size - 1];
    Some((String::from_utf8_lossy(payload).to_string(), total_size))
}

/// Walk a buffer of concatenated frames, yielding the decoded payloads.
pub fn parse_packets(data: &[u8]) -> Vec<String> {
    let mut packets = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        match parse_packet(&data[offset..]) {
            Some((payload, consumed)) => {
                if !payload.is_empty() {
                    packets.push(payload);
                }
                offset += consumed;
            }
            None => break,
        }
    }

    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stt_escape_unescape() {
        assert_eq!(stt_escape("hello@world/x"), "hello@Aworld@Sx");
        assert_eq!(stt_unescape("hello@Aworld@Sx"), "hello@world/x");
        assert_eq!(stt_unescape(&stt_escape("@/@S")), "@/@S");
    }

    #[test]
    fn test_stt_decode() {
        let map = stt_decode("type@=chatmsg/rid@=288016/txt@=Hello World!/");

        assert_eq!(map.get("type").map(String::as_str), Some("chatmsg"));
        assert_eq!(map.get("rid").map(String::as_str), Some("288016"));
        assert_eq!(map.get("txt").map(String::as_str), Some("Hello World!"));
    }

    #[test]
    fn test_create_packet_layout() {
        let message = "type@=loginreq/roomid@=288016/";
        let packet = create_packet(message);

        let length = u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]);
        assert_eq!(length as usize, message.len() + 9);
        assert_eq!(&packet[4..8], &packet[0..4]);
        assert_eq!(&packet[8..12], &CLIENT_MAGIC);
        assert_eq!(&packet[12..packet.len() - 1], message.as_bytes());
        assert_eq!(packet[packet.len() - 1], 0x00);
    }

    #[test]
    fn test_parse_packet_round_trip() {
        let message = "type@=chatmsg/nn@=TestUser/txt@=Hello!/";
        let packet = create_packet(message);

        let (payload, consumed) = parse_packet(&packet).unwrap();
        assert_eq!(payload, message);
        assert_eq!(consumed, packet.len());
    }

    #[test]
    fn test_parse_packets_concatenated() {
        let mut combined = create_packet("type@=first/").to_vec();
        combined.extend_from_slice(&create_packet("type@=second/"));

        assert_eq!(
            parse_packets(&combined),
            vec!["type@=first/", "type@=second/"]
        );
    }

    #[test]
    fn test_heartbeat_matches_constant() {
        assert_eq!(create_packet("type@=mrkl/").as_ref(), HEARTBEAT);
    }

    #[test]
    fn test_handshake_messages() {
        let protocol = DouyuDanmuProtocol::new(288016);
        let messages = protocol.handshake_messages().unwrap();
        assert_eq!(messages.len(), 2);

        let payloads: Vec<String> = messages
            .iter()
            .map(|m| match m {
                Message::Binary(data) => parse_packet(data).unwrap().0,
                other => panic!("unexpected message: {other:?}"),
            })
            .collect();

        assert_eq!(payloads[0], "type@=loginreq/roomid@=288016/");
        assert_eq!(payloads[1], "type@=joingroup/rid@=288016/gid@=-9999/");
    }

    #[test]
    fn test_decode_emits_chat_messages_only() {
        let protocol = DouyuDanmuProtocol::new(288016);
        let mut acc = Vec::new();

        let mut combined = create_packet("type@=chatmsg/txt@=hi/").to_vec();
        combined.extend_from_slice(&create_packet("type@=uenter/nn@=Someone/"));

        let items = protocol.decode(&combined, &mut acc).unwrap();
        assert_eq!(items, vec![Danmaku::chat("hi", "#fff")]);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_decode_accumulates_split_frames() {
        // A frame split across two transport messages only parses once the
        // buffer ends with the null terminator.
        let protocol = DouyuDanmuProtocol::new(288016);
        let mut acc = Vec::new();

        let packet = create_packet("type@=chatmsg/txt@=hi/");
        let (first, rest) = packet.split_at(packet.len() / 2);

        assert_eq!(protocol.decode(first, &mut acc).unwrap(), vec![]);
        assert!(!acc.is_empty());

        let items = protocol.decode(rest, &mut acc).unwrap();
        assert_eq!(items, vec![Danmaku::chat("hi", "#fff")]);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_decode_unterminated_buffer_is_empty() {
        let protocol = DouyuDanmuProtocol::new(288016);
        let mut acc = Vec::new();

        let packet = create_packet("type@=chatmsg/txt@=pending/");
        let unterminated = &packet[..packet.len() - 1];

        assert_eq!(protocol.decode(unterminated, &mut acc).unwrap(), vec![]);
        assert_eq!(acc, unterminated);
    }

    #[test]
    fn test_decode_escaped_text() {
        let protocol = DouyuDanmuProtocol::new(288016);
        let mut acc = Vec::new();

        let packet = create_packet(&format!("type@=chatmsg/txt@={}/", stt_escape("a/b@c")));
        let items = protocol.decode(&packet, &mut acc).unwrap();

        assert_eq!(items, vec![Danmaku::chat("a/b@c", "#fff")]);
    }
}
