//! Request/response shapes for the façade.

use serde::{Deserialize, Serialize};

/// Query parameters shared by both endpoints.
#[derive(Debug, Deserialize)]
pub struct RoomQuery {
    /// Platform tag: 0 = Bilibili, 1 = Douyu.
    pub platform: u64,
    #[serde(rename = "roomID")]
    pub room_id: u64,
    /// Stream quality; 0 lets the platform pick its default.
    #[serde(default)]
    pub quality: u64,
}

/// Uniform JSON envelope for successful responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub msg: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            msg: "success".to_string(),
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_query_quality_defaults_to_zero() {
        let query: RoomQuery =
            serde_urlencoded::from_str("platform=0&roomID=92613").unwrap();
        assert_eq!(query.platform, 0);
        assert_eq!(query.room_id, 92613);
        assert_eq!(query.quality, 0);
    }

    #[test]
    fn test_room_query_missing_room_id_is_rejected() {
        assert!(serde_urlencoded::from_str::<RoomQuery>("platform=0").is_err());
    }

    #[test]
    fn test_success_envelope() {
        let json = serde_json::to_value(ApiResponse::success(42)).unwrap();
        assert_eq!(json, serde_json::json!({"msg": "success", "data": 42}));
    }
}
