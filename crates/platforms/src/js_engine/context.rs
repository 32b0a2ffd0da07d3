//! JavaScript context wrapper.

use rquickjs::{CatchResultExt, CaughtError, FromJs};

use super::error::JsError;

/// Minimal browser environment for scripts lifted out of web pages.
/// Provides stubs for window, document and navigator.
const BROWSER_ENV_SETUP: &str = r#"
    var window = {};
    var navigator = {
        userAgent: 'Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36',
        platform: 'Win32',
        language: 'zh-CN'
    };
    window.navigator = navigator;
    window.addEventListener = function() {};
    window.sessionStorage = {};
    window.localStorage = {};
    var document = { cookie: '', hidden: true };
    window.document = document;
"#;

/// A context scoped to one signing run; scripts loaded into it do not leak
/// into later executions.
pub struct JsContext {
    ctx: rquickjs::Context,
}

impl JsContext {
    pub fn new(runtime: &rquickjs::Runtime) -> Result<Self, JsError> {
        let ctx = rquickjs::Context::full(runtime)
            .map_err(|e| JsError::ContextCreation(e.to_string()))?;
        Ok(Self { ctx })
    }

    /// Set up browser environment stubs (window, document, navigator).
    pub fn setup_browser_env(&self) -> Result<(), JsError> {
        self.eval::<()>(BROWSER_ENV_SETUP)
    }

    /// Load a script into the context for its side effects.
    pub fn load_script(&self, script: &str) -> Result<(), JsError> {
        self.eval::<()>(script)
    }

    /// Evaluate JavaScript code and convert the completion value.
    pub fn eval<T>(&self, code: &str) -> Result<T, JsError>
    where
        T: for<'js> FromJs<'js>,
    {
        self.ctx.with(|ctx| {
            ctx.eval(code)
                .catch(&ctx)
                .map_err(|caught| JsError::eval(describe_caught(caught)))
        })
    }
}

/// Flatten whatever the script threw into one printable line. Callers only
/// ever log these, so the exception text and its stack travel together.
fn describe_caught(caught: CaughtError) -> String {
    match caught {
        CaughtError::Exception(exception) => {
            let message = exception
                .message()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "unknown exception".to_string());
            match exception.stack().filter(|s| !s.is_empty()) {
                Some(stack) => format!("{message} at {stack}"),
                None => message,
            }
        }
        CaughtError::Value(value) => match value.as_string().and_then(|s| s.to_string().ok()) {
            Some(text) => format!("script threw {text:?}"),
            None => "script threw a non-string value".to_string(),
        },
        CaughtError::Error(err) => err.to_string(),
    }
}
