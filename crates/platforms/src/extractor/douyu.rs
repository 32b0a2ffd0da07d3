//! Douyu (斗鱼) room lookup and playback metadata.
//!
//! Playback URLs are guarded by an obfuscated signing routine embedded in the
//! room page; the extractor lifts that script out of the HTML and runs it in
//! the JS engine together with the bundled CryptoJS asset.

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::default::DEFAULT_UA;
use super::error::ExtractorError;
use super::{PlatformKind, Quality, RoomInfo};
use crate::js_engine::{CRYPTO_JS, JsEngineManager, JsError};

const BASE_URL: &str = "https://www.douyu.com";

/// Fixed device id expected by the signing routine.
const DEVICE_ID: &str = "10000000000000000000000000001501";

static ROOM_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$ROOM\.room_id\s*=\s*(\d+)").unwrap());
static SHOW_STATUS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$ROOM\.show_status\s*=\s*(\d+)").unwrap());
static SIGN_SCRIPT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<script type="text/javascript">(\s*var[\s\S]*?)</script>"#).unwrap());

/// Douyu platform driver (REST side).
///
/// [`Douyu::resolve`] fetches the room page once to canonicalize the id and
/// capture the live status; [`Douyu::live_info`] re-fetches it to pick up the
/// current signing script when the room is live.
pub struct Douyu {
    client: Client,
    room_id: u64,
    quality: u64,
    status: u64,
}

impl Douyu {
    /// Resolve a user-facing id against the room page.
    pub async fn resolve(
        client: &Client,
        room_id: u64,
        quality: u64,
    ) -> Result<Self, ExtractorError> {
        let html = fetch_room_page(client, room_id).await?;

        let canonical = capture_u64(&ROOM_ID_REGEX, &html)
            .ok_or(ExtractorError::RoomNotFound(room_id))?;
        let status = capture_u64(&SHOW_STATUS_REGEX, &html).unwrap_or(0);
        debug!(room_id, canonical, status, "resolved douyu room");

        Ok(Self {
            client: client.clone(),
            room_id: canonical,
            quality,
            status,
        })
    }

    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// Fetch playback metadata for the room.
    pub async fn live_info(&self) -> Result<RoomInfo, ExtractorError> {
        if self.status != 1 {
            return Ok(RoomInfo {
                platform: PlatformKind::Douyu,
                room_id: self.room_id,
                status: 0,
                current_quality: self.quality,
                link: String::new(),
                qualities: Vec::new(),
            });
        }

        let html = fetch_room_page(&self.client, self.room_id).await?;
        let script = extract_sign_script(&html)?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let params = sign_play_request(&script, self.room_id, timestamp)?;
        debug!(room_id = self.room_id, params = %params, "signed play request");

        let body = self
            .client
            .post(format!("{BASE_URL}/lapi/live/getH5Play/{}", self.room_id))
            .header(reqwest::header::USER_AGENT, DEFAULT_UA)
            .header(reqwest::header::REFERER, BASE_URL)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(format!("{params}&rate={}", self.quality))
            .send()
            .await?
            .text()
            .await?;

        let json: Value = serde_json::from_str(&body)?;
        if json.get("error").and_then(|v| v.as_i64()).unwrap_or(0) != 0 {
            let msg = json
                .get("msg")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(ExtractorError::Validation(format!(
                "getH5Play failed: {msg}"
            )));
        }

        let data = json.get("data").cloned().unwrap_or(Value::Null);
        Ok(RoomInfo {
            platform: PlatformKind::Douyu,
            room_id: self.room_id,
            status: self.status,
            current_quality: self.quality,
            link: build_link(&data),
            qualities: parse_qualities(&data),
        })
    }
}

async fn fetch_room_page(client: &Client, room_id: u64) -> Result<String, ExtractorError> {
    Ok(client
        .get(format!("{BASE_URL}/{room_id}"))
        .header(reqwest::header::USER_AGENT, DEFAULT_UA)
        .header(reqwest::header::REFERER, BASE_URL)
        .send()
        .await?
        .text()
        .await?)
}

fn capture_u64(regex: &Regex, haystack: &str) -> Option<u64> {
    regex
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extract the signing script: the last inline `text/javascript` block that
/// opens with a `var` declaration defines `ub98484234`.
fn extract_sign_script(html: &str) -> Result<String, ExtractorError> {
    SIGN_SCRIPT_REGEX
        .captures_iter(html)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ExtractorError::Validation("signing script not found in room page".into()))
}

/// Run the page's signing routine; the result is the URL-encoded form body
/// for the getH5Play call.
fn sign_play_request(script: &str, room_id: u64, timestamp: u64) -> Result<String, JsError> {
    JsEngineManager::global().execute_with_scripts(&[CRYPTO_JS, script], |ctx| {
        ctx.eval::<String>(&format!("ub98484234({room_id}, '{DEVICE_ID}', {timestamp})"))
    })
}

fn build_link(data: &Value) -> String {
    let rtmp_url = data.get("rtmp_url").and_then(|v| v.as_str()).unwrap_or("");
    let rtmp_live = data.get("rtmp_live").and_then(|v| v.as_str()).unwrap_or("");
    if rtmp_url.is_empty() && rtmp_live.is_empty() {
        return String::new();
    }
    format!("{rtmp_url}/{rtmp_live}")
}

fn parse_qualities(data: &Value) -> Vec<Quality> {
    data.get("multirates")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|q| {
                    Some(Quality {
                        code: q.get("rate")?.as_u64()?,
                        label: q.get("name")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r#"
        <html><head><script>var other = 1;</script></head>
        <body>
        <script type="text/javascript"> var decoy = function () {};</script>
        <script>$ROOM.room_id = 288016; $ROOM.show_status = 1;</script>
        <script type="text/javascript"> var vdwdae325w_64we = 'x';
            function ub98484234(rid, did, ts) {
                return 'v=220120250612&did=' + did + '&tt=' + ts
                    + '&sign=' + CryptoJS.md5(rid + did + ts).toString();
            }
        </script>
        </body></html>
    "#;

    #[test]
    fn test_capture_room_id_and_status() {
        assert_eq!(capture_u64(&ROOM_ID_REGEX, SAMPLE_PAGE), Some(288016));
        assert_eq!(capture_u64(&SHOW_STATUS_REGEX, SAMPLE_PAGE), Some(1));
        assert_eq!(capture_u64(&ROOM_ID_REGEX, "<html></html>"), None);
    }

    #[test]
    fn test_extract_sign_script_takes_last_block() {
        let script = extract_sign_script(SAMPLE_PAGE).unwrap();
        assert!(script.contains("ub98484234"));
        assert!(!script.contains("decoy"));
    }

    #[test]
    fn test_sign_play_request_runs_page_script() {
        let script = extract_sign_script(SAMPLE_PAGE).unwrap();
        let params = sign_play_request(&script, 288016, 1700000000).unwrap();

        assert!(params.starts_with("v=220120250612&did=10000000000000000000000000001501"));
        assert!(params.contains("&tt=1700000000"));
        assert!(params.contains("&sign="));
    }

    #[test]
    fn test_build_link_concatenates_rtmp_fields() {
        let data = serde_json::json!({
            "rtmp_url": "http://hw-tct.douyucdn.cn/live",
            "rtmp_live": "288016.flv?token=abc"
        });
        assert_eq!(
            build_link(&data),
            "http://hw-tct.douyucdn.cn/live/288016.flv?token=abc"
        );
        assert_eq!(build_link(&serde_json::json!({})), "");
    }

    #[test]
    fn test_parse_qualities() {
        let data = serde_json::json!({
            "multirates": [
                {"rate": 0, "name": "原画", "highBit": 1},
                {"rate": 2, "name": "高清"}
            ]
        });
        assert_eq!(
            parse_qualities(&data),
            vec![
                Quality {
                    code: 0,
                    label: "原画".to_string()
                },
                Quality {
                    code: 2,
                    label: "高清".to_string()
                },
            ]
        );
    }

    /// Real integration test - queries the live Douyu site.
    /// Run with: cargo test -p platforms extractor::douyu::tests::test_real_live_info -- --ignored --nocapture
    #[tokio::test]
    #[ignore]
    async fn test_real_live_info() {
        let client = crate::extractor::default_client();
        let room = Douyu::resolve(&client, 288016, 0).await.unwrap();
        let info = room.live_info().await.unwrap();
        println!("{info:?}");
        assert_eq!(info.platform, PlatformKind::Douyu);
    }
}
