//! Bilibili (哔哩哔哩) room lookup and playback metadata.

use rand::RngExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::default::DEFAULT_UA;
use super::error::ExtractorError;
use super::{PlatformKind, Quality, RoomInfo};

const INFO_URL: &str = "https://api.live.bilibili.com/xlive/web-room/v1/index/getInfoByRoom";
const PLAY_URL: &str = "https://api.live.bilibili.com/xlive/web-room/v1/index/getRoomPlayInfo";
const LIVE_REFERER: &str = "https://live.bilibili.com";

/// Quality requested when the caller does not pick one.
const DEFAULT_QUALITY: u64 = 10000;

#[derive(Debug, Deserialize)]
struct InfoByRoomResponse {
    code: i64,
    data: Option<InfoByRoomData>,
}

#[derive(Debug, Deserialize)]
struct InfoByRoomData {
    room_info: IndexRoomInfo,
}

#[derive(Debug, Deserialize)]
struct IndexRoomInfo {
    room_id: u64,
}

/// Bilibili platform driver (REST side).
///
/// Holds the canonical room id; obtain one with [`Bilibili::resolve`] before
/// constructing, so that short/display ids never leak into registry keys.
pub struct Bilibili {
    client: Client,
    room_id: u64,
    quality: u64,
}

impl Bilibili {
    pub fn new(client: Client, room_id: u64, quality: u64) -> Self {
        Self {
            client,
            room_id,
            quality,
        }
    }

    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// Resolve a user-facing (possibly short) id to the canonical room id.
    pub async fn resolve(client: &Client, room_id: u64) -> Result<u64, ExtractorError> {
        let resp: InfoByRoomResponse = client
            .get(INFO_URL)
            .query(&[("room_id", room_id)])
            .header(reqwest::header::USER_AGENT, DEFAULT_UA)
            .header(reqwest::header::REFERER, LIVE_REFERER)
            .send()
            .await?
            .json()
            .await?;

        if resp.code != 0 {
            return Err(ExtractorError::RoomNotFound(room_id));
        }

        resp.data
            .map(|d| d.room_info.room_id)
            .ok_or(ExtractorError::RoomNotFound(room_id))
    }

    /// Fetch playback metadata for the room.
    ///
    /// When the upstream returns more than one playback URL, one is chosen at
    /// random to spread load across CDN hosts.
    pub async fn live_info(&self) -> Result<RoomInfo, ExtractorError> {
        let quality = if self.quality == 0 {
            DEFAULT_QUALITY
        } else {
            self.quality
        };

        let body = self
            .client
            .get(PLAY_URL)
            .query(&[
                ("room_id", self.room_id.to_string()),
                ("play_url", "1".to_string()),
                ("mask", "1".to_string()),
                ("qn", quality.to_string()),
                ("platform", "web".to_string()),
            ])
            .header(reqwest::header::USER_AGENT, DEFAULT_UA)
            .header(reqwest::header::REFERER, LIVE_REFERER)
            .send()
            .await?
            .text()
            .await?;

        let json: Value = serde_json::from_str(&body)?;
        if json.get("code").and_then(|v| v.as_i64()).unwrap_or(-1) != 0 {
            return Err(ExtractorError::RoomNotFound(self.room_id));
        }

        let data = json.get("data").cloned().unwrap_or(Value::Null);
        let play_url = data.get("play_url").cloned().unwrap_or(Value::Null);
        debug!(room_id = self.room_id, "fetched room play info");

        Ok(RoomInfo {
            platform: PlatformKind::Bilibili,
            room_id: self.room_id,
            status: data
                .get("live_status")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            current_quality: play_url
                .get("current_qn")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            link: pick_link(&play_url),
            qualities: parse_qualities(&play_url),
        })
    }
}

/// Pick one playback URL at random from `play_url.durl`.
fn pick_link(play_url: &Value) -> String {
    let urls: Vec<&str> = play_url
        .get("durl")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|d| d.get("url").and_then(|u| u.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if urls.is_empty() {
        return String::new();
    }
    let mut rng = rand::rng();
    urls[rng.random_range(0..urls.len())].to_string()
}

fn parse_qualities(play_url: &Value) -> Vec<Quality> {
    play_url
        .get("quality_description")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|q| {
                    Some(Quality {
                        code: q.get("qn")?.as_u64()?,
                        label: q.get("desc")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
