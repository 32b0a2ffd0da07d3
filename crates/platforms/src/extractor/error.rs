use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("platform {0} not found")]
    PlatformNotFound(u64),
    #[error("room {0} not found")]
    RoomNotFound(u64),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("js error: {0}")]
    Js(#[from] crate::js_engine::JsError),
    #[error("{0}")]
    Validation(String),
}
