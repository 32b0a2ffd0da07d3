use thiserror::Error;

/// Errors that can occur during JavaScript execution.
#[derive(Debug, Error)]
pub enum JsError {
    #[error("failed to create JS runtime: {0}")]
    RuntimeCreation(String),
    #[error("failed to create JS context: {0}")]
    ContextCreation(String),
    #[error("JS evaluation failed: {0}")]
    Evaluation(String),
}

impl JsError {
    /// Create an evaluation error from a message.
    pub fn eval(message: impl Into<String>) -> Self {
        JsError::Evaluation(message.into())
    }
}

impl From<rquickjs::Error> for JsError {
    fn from(err: rquickjs::Error) -> Self {
        JsError::eval(err.to_string())
    }
}
