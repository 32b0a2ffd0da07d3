//! Room lookup and playback metadata extraction.

pub mod bilibili;
pub mod default;
pub mod douyu;
pub mod error;

pub use default::default_client;
pub use error::ExtractorError;

use serde::Serialize;

/// Supported upstream platforms.
///
/// The discriminants are part of the public API (`platform` query parameter)
/// and of registry keys, so they must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
#[serde(into = "u32")]
pub enum PlatformKind {
    Bilibili = 0,
    Douyu = 1,
}

impl PlatformKind {
    /// Numeric tag used in registry keys and JSON responses.
    pub fn tag(self) -> u32 {
        self as u32
    }
}

impl From<PlatformKind> for u32 {
    fn from(kind: PlatformKind) -> Self {
        kind as u32
    }
}

impl TryFrom<u64> for PlatformKind {
    type Error = ExtractorError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PlatformKind::Bilibili),
            1 => Ok(PlatformKind::Douyu),
            other => Err(ExtractorError::PlatformNotFound(other)),
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformKind::Bilibili => write!(f, "bilibili"),
            PlatformKind::Douyu => write!(f, "douyu"),
        }
    }
}

/// One stream quality option offered by the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quality {
    pub code: u64,
    pub label: String,
}

/// Playback metadata for a room, as surfaced by `/api/live`.
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub platform: PlatformKind,
    pub room_id: u64,
    /// 0 = offline, non-zero = live.
    pub status: u64,
    pub current_quality: u64,
    /// Single playback URL; empty when the room is offline.
    pub link: String,
    pub qualities: Vec<Quality>,
}
