//! Evidence for post-hoc inspection: per snapshot a full-page PNG, the document
//! markup, and one line appended to `diagnostics.jsonl`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dom;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::types::{ActionRecord, MutationSignal, OverlayDescriptor, slugify};

pub const LOG_FILE: &str = "diagnostics.jsonl";

/// Where in a step a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pre,
    Post,
    NotFound,
    Failed,
}

impl Phase {
    fn suffix(&self) -> &'static str {
        match self {
            Phase::Pre => "pre",
            Phase::Post => "post",
            Phase::NotFound => "not_found",
            Phase::Failed => "failed",
        }
    }
}

/// One append-only log entry. Capture paths are `None` when the capture
/// itself failed; the entry is still written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDiagnostic {
    pub step_index: usize,
    pub name: String,
    pub phase: Phase,
    pub action: ActionRecord,
    pub visual_path: Option<PathBuf>,
    pub markup_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<MutationSignal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<OverlayDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Extra context attached to a snapshot.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub signal: Option<MutationSignal>,
    pub overlays: Vec<OverlayDescriptor>,
    pub note: Option<String>,
}

pub struct Recorder {
    dir: PathBuf,
    log_path: PathBuf,
    entries: Vec<StepDiagnostic>,
}

impl Recorder {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let log_path = dir.join(LOG_FILE);
        Ok(Self {
            dir,
            log_path,
            entries: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Entries recorded during this run, in production order.
    pub fn entries(&self) -> &[StepDiagnostic] {
        &self.entries
    }

    /// Capture visual + markup evidence and append a log entry. Capture
    /// failures are logged and swallowed.
    pub fn capture<E: Engine + ?Sized>(
        &mut self,
        engine: &E,
        step_index: usize,
        record: &ActionRecord,
        phase: Phase,
        context: Context,
    ) -> &StepDiagnostic {
        let timestamp = Utc::now();
        let name = format!("step{:02}_{}_{}", step_index, record.slug(), phase.suffix());
        let stem = format!("{}_{}", timestamp.format("%Y-%m-%dT%H-%M-%S%.3fZ"), slugify(&name));

        let visual_path = match engine.screenshot() {
            Ok(png) => self.write_file(&format!("{stem}.png"), &png),
            Err(e) => {
                warn!(step = step_index, "screenshot failed: {e}");
                None
            }
        };
        let markup_path = match dom::capture_markup(engine) {
            Ok(html) => self.write_file(&format!("{stem}.html"), html.as_bytes()),
            Err(e) => {
                warn!(step = step_index, "markup capture failed: {e}");
                None
            }
        };
        let url = Some(dom::page_location(engine).url).filter(|u| u != "unknown");

        let entry = StepDiagnostic {
            step_index,
            name,
            phase,
            action: record.clone(),
            visual_path,
            markup_path,
            timestamp,
            url,
            signal: context.signal,
            overlays: context.overlays,
            note: context.note,
        };
        if let Err(e) = self.append(&entry) {
            warn!(step = step_index, "diagnostic log write failed: {e}");
        }
        info!(step = step_index, name = %entry.name, "snapshot");
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    fn write_file(&self, file_name: &str, bytes: &[u8]) -> Option<PathBuf> {
        let path = self.dir.join(file_name);
        match std::fs::write(&path, bytes) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("cannot write {}: {e}", path.display());
                None
            }
        }
    }

    fn append(&self, entry: &StepDiagnostic) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Read back a diagnostics log.
pub fn read_log(path: &Path) -> Result<Vec<StepDiagnostic>> {
    let raw = std::fs::read_to_string(path)?;
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str::<StepDiagnostic>(l)
                .map_err(|e| Error::from(std::io::Error::other(e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineResult;
    use crate::error::EngineError;
    use crate::types::Action;
    use serde_json::Value;
    use std::time::Duration;

    /// Screenshots fail, markup works.
    struct HalfBroken;

    impl Engine for HalfBroken {
        fn navigate(&self, _: &str) -> EngineResult<()> {
            Ok(())
        }
        fn evaluate(&self, _: &str) -> EngineResult<Value> {
            Ok(Value::String(
                r#"{"url":"https://example.test/","title":"t"}"#.into(),
            ))
        }
        fn scroll_into_view(&self, _: &str) -> EngineResult<()> {
            Ok(())
        }
        fn click(&self, _: &str) -> EngineResult<()> {
            Ok(())
        }
        fn focus(&self, _: &str) -> EngineResult<()> {
            Ok(())
        }
        fn type_text(&self, _: &str, _: &dyn Fn() -> Duration) -> EngineResult<()> {
            Ok(())
        }
        fn screenshot(&self) -> EngineResult<Vec<u8>> {
            Err(EngineError::Timeout("capture".into()))
        }
        fn markup(&self) -> EngineResult<String> {
            Ok("<html></html>".into())
        }
        fn save_state(&self, _: &Path) -> EngineResult<()> {
            Ok(())
        }
        fn restore_state(&self, _: &Path) -> EngineResult<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_capture_still_logs_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = Recorder::new(dir.path()).unwrap();
        let action = ActionRecord::new(Action::Click {
            target: "Add project".into(),
        });

        let entry = rec
            .capture(&HalfBroken, 2, &action, Phase::NotFound, Context::default())
            .clone();
        assert_eq!(entry.name, "step02_click_add_project_not_found");
        assert!(entry.visual_path.is_none());
        let markup = entry.markup_path.unwrap();
        assert!(markup.to_string_lossy().ends_with("_not_found.html"));
        assert_eq!(std::fs::read_to_string(markup).unwrap(), "<html></html>");
        assert_eq!(entry.url.as_deref(), Some("https://example.test/"));

        let log = read_log(rec.log_path()).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, action);
    }

    #[test]
    fn log_lines_carry_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = Recorder::new(dir.path()).unwrap();
        let action = ActionRecord::new(Action::Navigate {
            url: "https://linear.app/".into(),
        });
        rec.capture(&HalfBroken, 0, &action, Phase::Pre, Context::default());
        rec.capture(&HalfBroken, 0, &action, Phase::Post, Context::default());

        let raw = std::fs::read_to_string(rec.log_path()).unwrap();
        let lines: Vec<Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            for key in ["name", "visualPath", "markupPath", "timestamp", "action"] {
                assert!(line.get(key).is_some(), "missing {key}");
            }
        }
        assert_eq!(lines[1]["action"]["kind"], "navigate");
        assert_eq!(lines[1]["phase"], "post");
    }
}
