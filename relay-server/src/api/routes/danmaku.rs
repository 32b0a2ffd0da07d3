//! `GET /api/danmaku` - danmaku subscription over WebSocket.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use platforms::PlatformKind;
use platforms::danmaku::DanmuProtocol;
use platforms::danmaku::bilibili::BilibiliDanmuProtocol;
use platforms::danmaku::douyu::DouyuDanmuProtocol;
use platforms::extractor::bilibili::Bilibili;
use platforms::extractor::douyu::Douyu;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::RoomQuery;
use crate::api::server::AppState;

/// Upgrade to a WebSocket and attach the client to the room's chat stream.
///
/// Canonicalization happens before the upgrade so that lookup failures still
/// surface as a plain 400, and so the registry only ever sees canonical ids.
pub async fn subscribe(
    State(state): State<AppState>,
    query: Result<Query<RoomQuery>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let Query(params) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let platform = PlatformKind::try_from(params.platform)?;

    let protocol: Arc<dyn DanmuProtocol> = match platform {
        PlatformKind::Bilibili => {
            let room_id = Bilibili::resolve(&state.client, params.room_id).await?;
            Arc::new(BilibiliDanmuProtocol::new(room_id))
        }
        PlatformKind::Douyu => {
            let room = Douyu::resolve(&state.client, params.room_id, 0).await?;
            Arc::new(DouyuDanmuProtocol::new(room.room_id()))
        }
    };

    let registry = Arc::clone(&state.registry);
    Ok(ws.on_upgrade(move |socket| async move {
        registry.subscribe(protocol, socket).await;
    }))
}
