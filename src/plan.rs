//! Plan files: an ordered JSON array of action records.
//!
//! ```json
//! [
//!   {"type": "goto", "url": "https://linear.app/"},
//!   {"type": "click", "target": "Projects"},
//!   {"type": "type", "target": "name", "text": "Foo"},
//!   {"type": "wait", "seconds": 30}
//! ]
//! ```
//!
//! Fields a record's type does not use are ignored. A record missing a field
//! its type requires, or carrying a field of the wrong JSON type, is kept as
//! [`Action::Invalid`] so the run can report it in place.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use crate::error::PlanError;
use crate::types::{Action, ActionRecord};

#[derive(Debug, Clone, Deserialize)]
struct RawRecord {
    #[serde(rename = "type", alias = "kind")]
    kind: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    seconds: Option<f64>,
    #[serde(default)]
    gating: Option<bool>,
    #[serde(default)]
    label: Option<String>,
}

impl RawRecord {
    fn into_record(self) -> ActionRecord {
        let action = match self.kind.trim().to_ascii_lowercase().as_str() {
            "goto" | "navigate" => match non_empty(self.url) {
                Some(url) => Action::Navigate { url },
                None => invalid(&self.kind, "missing url"),
            },
            "click" => match non_empty(self.target) {
                Some(target) => Action::Click { target },
                None => invalid(&self.kind, "missing target"),
            },
            "type" => match (non_empty(self.target), self.text) {
                (Some(target), Some(text)) => Action::Type { target, text },
                (None, _) => invalid(&self.kind, "missing target"),
                (_, None) => invalid(&self.kind, "missing text"),
            },
            "wait" => match self.seconds {
                Some(secs) if secs.is_finite() && secs >= 0.0 => {
                    match Duration::try_from_secs_f64(secs) {
                        Ok(duration) => Action::Wait { duration },
                        Err(_) => invalid(&self.kind, "seconds out of range"),
                    }
                }
                _ => invalid(&self.kind, "missing or negative seconds"),
            },
            other => invalid(other, "unknown action type"),
        };

        let mut record = ActionRecord::new(action);
        if let Some(gating) = self.gating {
            record.gating = gating;
        }
        if matches!(record.action, Action::Invalid { .. }) {
            record.gating = true;
        }
        record.label = self.label;
        record
    }
}

/// Decodes one array element. A record whose fields have the wrong JSON
/// types still takes its place in the plan, as an invalid step.
fn decode(value: Value) -> ActionRecord {
    match RawRecord::deserialize(&value) {
        Ok(raw) => raw.into_record(),
        Err(e) => {
            let declared = value
                .get("type")
                .or_else(|| value.get("kind"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let mut record = ActionRecord::new(invalid(declared, &e.to_string()));
            record.gating = true;
            record.label = value
                .get("label")
                .and_then(Value::as_str)
                .map(str::to_string);
            record
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn invalid(declared: &str, reason: &str) -> Action {
    Action::Invalid {
        declared: declared.to_string(),
        reason: reason.to_string(),
    }
}

/// An ordered, non-empty sequence of steps. Read-only to the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    steps: Vec<ActionRecord>,
}

impl Plan {
    pub fn new(steps: Vec<ActionRecord>) -> Result<Self, PlanError> {
        if steps.is_empty() {
            return Err(PlanError::Empty);
        }
        Ok(Self { steps })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, PlanError> {
        let records: Vec<Value> = serde_json::from_str(raw)?;
        Self::new(records.into_iter().map(decode).collect())
    }

    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn steps(&self) -> &[ActionRecord] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
