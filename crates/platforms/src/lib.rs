//! Platform drivers for live-stream chat relaying.
//!
//! Each supported platform contributes two pieces:
//! - an extractor ([`extractor`]) that resolves the canonical room id and
//!   fetches playback metadata over REST, and
//! - a danmaku protocol ([`danmaku`]) that speaks the platform's binary chat
//!   framing over a WebSocket.
//!
//! The room runtime that owns connections and fans messages out to local
//! subscribers lives in the server crate; this crate is connection-agnostic
//! and only encodes/decodes the wire formats.

pub mod danmaku;
pub mod extractor;
pub mod js_engine;

pub use danmaku::{Danmaku, DanmuProtocol};
pub use extractor::{PlatformKind, Quality, RoomInfo};
