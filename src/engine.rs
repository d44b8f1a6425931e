//! The boundary to the rendering/automation engine.
//!
//! Everything the core needs from a real browser goes through [`Engine`]:
//! navigation, script evaluation, element interaction by CSS selector, captures
//! and session-state persistence. [`crate::hands::BrowserSession`] implements it
//! over Chrome; tests implement it with a scripted page.

use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

pub trait Engine {
    /// Load `url` and return once the document is ready.
    fn navigate(&self, url: &str) -> EngineResult<()>;

    /// Evaluate an expression in page context and return its value.
    fn evaluate(&self, script: &str) -> EngineResult<Value>;

    fn scroll_into_view(&self, selector: &str) -> EngineResult<()>;

    fn click(&self, selector: &str) -> EngineResult<()>;

    fn focus(&self, selector: &str) -> EngineResult<()>;

    /// Type into the focused element one character at a time, sleeping
    /// `delay()` between keystrokes.
    fn type_text(&self, text: &str, delay: &dyn Fn() -> Duration) -> EngineResult<()>;

    /// Full-page PNG.
    fn screenshot(&self) -> EngineResult<Vec<u8>>;

    /// Serialized markup of the whole document.
    fn markup(&self) -> EngineResult<String>;

    fn save_state(&self, path: &Path) -> EngineResult<()>;

    fn restore_state(&self, path: &Path) -> EngineResult<()>;
}

/// Evaluate a script that returns `JSON.stringify(..)` and decode it.
pub fn evaluate_json<E, T>(engine: &E, script: &str) -> EngineResult<T>
where
    E: Engine + ?Sized,
    T: serde::de::DeserializeOwned,
{
    let value = engine.evaluate(script)?;
    let raw = match value {
        Value::String(s) => s,
        Value::Null => return Err(EngineError::Script("script returned nothing".into())),
        other => other.to_string(),
    };
    serde_json::from_str(&raw).map_err(|e| EngineError::Script(format!("bad script result: {e}")))
}
