use thiserror::Error;

pub type Result<T> = std::result::Result<T, DanmakuError>;

#[derive(Debug, Error)]
pub enum DanmakuError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DanmakuError {
    pub fn connection(msg: impl Into<String>) -> Self {
        DanmakuError::Connection(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        DanmakuError::Protocol(msg.into())
    }
}
