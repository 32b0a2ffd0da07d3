//! JavaScript engine manager with thread-local runtime caching.

use std::cell::RefCell;

use super::context::JsContext;
use super::error::JsError;

// QuickJS runtimes are not thread-safe (they use Rc internally), so each
// thread caches its own runtime instead of re-creating one per execution.
thread_local! {
    static THREAD_RUNTIME: RefCell<Option<rquickjs::Runtime>> = const { RefCell::new(None) };
}

/// A manager for JavaScript execution using thread-local runtimes.
pub struct JsEngineManager;

impl JsEngineManager {
    /// Get the global engine manager instance.
    pub fn global() -> Self {
        Self
    }

    /// Get or create the thread-local runtime.
    fn with_runtime<F, T>(f: F) -> Result<T, JsError>
    where
        F: FnOnce(&rquickjs::Runtime) -> Result<T, JsError>,
    {
        THREAD_RUNTIME.with(|cell| {
            let mut runtime_ref = cell.borrow_mut();

            if runtime_ref.is_none() {
                let runtime = rquickjs::Runtime::new()
                    .map_err(|e| JsError::RuntimeCreation(e.to_string()))?;
                *runtime_ref = Some(runtime);
            }

            // Safe to unwrap since we just ensured it's Some
            f(runtime_ref.as_ref().unwrap())
        })
    }

    /// Execute a function with a fresh JavaScript context.
    pub fn execute<F, T>(&self, f: F) -> Result<T, JsError>
    where
        F: FnOnce(&JsContext) -> Result<T, JsError>,
    {
        Self::with_runtime(|runtime| {
            let ctx = JsContext::new(runtime)?;
            f(&ctx)
        })
    }

    /// Execute with browser environment stubs and pre-loaded scripts.
    pub fn execute_with_scripts<F, T>(&self, scripts: &[&str], f: F) -> Result<T, JsError>
    where
        F: FnOnce(&JsContext) -> Result<T, JsError>,
    {
        self.execute(|ctx| {
            ctx.setup_browser_env()?;
            for script in scripts {
                ctx.load_script(script)?;
            }
            f(ctx)
        })
    }
}

impl Default for JsEngineManager {
    fn default() -> Self {
        Self::global()
    }
}
