//! Upstream chat (danmaku) wire protocols.

pub mod bilibili;
pub mod douyu;
pub mod error;

pub use error::{DanmakuError, Result};

use std::time::Duration;

use serde::Serialize;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::extractor::PlatformKind;

/// A chat message surfaced to local subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Danmaku {
    pub text: String,
    /// CSS hex color string.
    pub color: String,
    /// Reserved; always 0 currently.
    pub kind: i32,
}

impl Danmaku {
    pub fn chat(text: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: color.into(),
            kind: 0,
        }
    }
}

/// Wire-protocol definitions for one platform's chat service.
///
/// Implementations are pure codecs bound to a canonical room id; the room
/// runtime owns the socket and drives the calls. Any `Err` from [`decode`]
/// is fatal for the room.
///
/// [`decode`]: DanmuProtocol::decode
pub trait DanmuProtocol: Send + Sync + 'static {
    /// Platform this protocol speaks for.
    fn platform(&self) -> PlatformKind;

    /// Canonical room id the protocol was built for.
    fn room_id(&self) -> u64;

    /// Chat endpoint to dial.
    fn websocket_url(&self) -> String;

    /// Frames to send immediately after the socket opens, in order.
    fn handshake_messages(&self) -> Result<Vec<Message>>;

    /// Periodic keep-alive frame.
    fn heartbeat_message(&self) -> Message;

    fn heartbeat_interval(&self) -> Duration;

    /// Decode one upstream message into zero or more chat messages.
    ///
    /// `acc` persists across calls for protocols whose logical frames span
    /// transport messages; protocols that frame per-message ignore it.
    fn decode(&self, payload: &[u8], acc: &mut Vec<u8>) -> Result<Vec<Danmaku>>;
}
