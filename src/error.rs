use std::path::PathBuf;
use thiserror::Error;

/// A failed call into the browser automation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("element rejected interaction: {0}")]
    Interaction(String),
    #[error("page script failed: {0}")]
    Script(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Classify an error bubbled up from the CDP client.
    pub fn from_cdp(context: &str, err: anyhow::Error) -> Self {
        let message = format!("{context}: {err:#}");
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") || lower.contains("never came") {
            EngineError::Timeout(message)
        } else {
            EngineError::Protocol(message)
        }
    }
}

/// Why a single step did not succeed. Never fatal to the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("no visible element matched \"{target}\"")]
    ResolutionMiss { target: String },
    #[error("interaction with \"{target}\" failed: {message}")]
    InteractionFailure { target: String, message: String },
    #[error("navigation to {url} did not complete: {message}")]
    NavigationTimeout { url: String, message: String },
    #[error("invalid {declared} record: {reason}")]
    InvalidAction { declared: String, reason: String },
}

/// Errors that end a run before or outside plan execution.
#[derive(Debug, Error)]
pub enum Error {
    #[error("browser launch failed: {0}")]
    FatalLaunchFailure(String),
    #[error("profile directory {0} is in use by another run")]
    ProfileLocked(PathBuf),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,
    #[error("plan is not a JSON array of records: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("cannot read plan file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
