//! Façade error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use platforms::extractor::ExtractorError;

/// Façade error; every failure surfaces to the caller as
/// `400 {"msg": <text>, "data": null}`.
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.message, "request failed");
        let body = serde_json::json!({ "msg": self.message, "data": null });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl From<ExtractorError> for ApiError {
    fn from(err: ExtractorError) -> Self {
        Self::bad_request(err.to_string())
    }
}

/// Result type for façade handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_not_found_message() {
        let err: ApiError = ExtractorError::RoomNotFound(999).into();
        assert_eq!(err.message, "room 999 not found");
    }

    #[test]
    fn test_platform_not_found_message() {
        let err: ApiError = ExtractorError::PlatformNotFound(7).into();
        assert_eq!(err.message, "platform 7 not found");
    }
}
