//! `GET /api/live` - room playback metadata.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use platforms::extractor::bilibili::Bilibili;
use platforms::extractor::douyu::Douyu;
use platforms::{PlatformKind, RoomInfo};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{ApiResponse, RoomQuery};
use crate::api::server::AppState;

/// Look a room up and return its playback metadata.
///
/// The display id is canonicalized through the platform's lookup before
/// anything else happens; errors of any category surface as 400.
pub async fn room_info(
    State(state): State<AppState>,
    query: Result<Query<RoomQuery>, QueryRejection>,
) -> ApiResult<Json<ApiResponse<RoomInfo>>> {
    let Query(params) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let platform = PlatformKind::try_from(params.platform)?;

    let info = match platform {
        PlatformKind::Bilibili => {
            let room_id = Bilibili::resolve(&state.client, params.room_id).await?;
            Bilibili::new(state.client.clone(), room_id, params.quality)
                .live_info()
                .await?
        }
        PlatformKind::Douyu => {
            Douyu::resolve(&state.client, params.room_id, params.quality)
                .await?
                .live_info()
                .await?
        }
    };

    Ok(Json(ApiResponse::success(info)))
}
