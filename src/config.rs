use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Every delay the run uses, in milliseconds. Tuned against one UI, so they
/// live here rather than as literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Timings {
    pub navigate_settle: u64,
    pub ready_attempts: u32,
    pub ready_interval: u64,
    pub scroll_pause: u64,
    pub editor_appear: u64,
    pub keystroke_delay: u64,
    pub keystroke_jitter: u64,
    pub resolve_wait: u64,
    pub resolve_poll: u64,
    pub stabilize_poll: u64,
    pub stabilize_timeout: u64,
    pub quiet_window: u64,
    pub grace: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            navigate_settle: 3000,
            ready_attempts: 6,
            ready_interval: 4000,
            scroll_pause: 400,
            editor_appear: 1500,
            keystroke_delay: 70,
            keystroke_jitter: 30,
            resolve_wait: 10_000,
            resolve_poll: 1000,
            stabilize_poll: 150,
            stabilize_timeout: 3000,
            quiet_window: 600,
            grace: 150,
        }
    }
}

impl Timings {
    /// All delays zeroed and budgets minimal. Used for scripted runs.
    pub fn immediate() -> Self {
        Self {
            navigate_settle: 0,
            ready_attempts: 1,
            ready_interval: 0,
            scroll_pause: 0,
            editor_appear: 0,
            keystroke_delay: 0,
            keystroke_jitter: 0,
            resolve_wait: 0,
            resolve_poll: 0,
            stabilize_poll: 1,
            stabilize_timeout: 50,
            quiet_window: 10,
            grace: 0,
        }
    }

    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}

/// A target only reachable through a containing landmark, e.g. the
/// "Projects" item under the sidebar's "Workspace" section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRule {
    /// Normalized target phrases this rule applies to.
    pub targets: Vec<String>,
    /// Heading text or id fragment identifying the landmark section.
    pub keyword: String,
}

/// A category of target recognized by phrase, matched against text, accessible
/// label or a generated class fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordClass {
    pub name: String,
    /// The rule applies when the normalized target contains one of these.
    pub triggers: Vec<String>,
    #[serde(default)]
    pub texts: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub class_fingerprints: Vec<String>,
}

/// Editable-field pattern probed by `type` steps, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "match", content = "value", rename_all = "camelCase")]
pub enum FieldPattern {
    /// Every listed class must be present.
    Classes(Vec<String>),
    Role(String),
    ContentEditable,
    /// `input`/`textarea` that accepts text.
    Tag(String),
}

/// All site-specific matching strings. The resolution algorithm itself never
/// names a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SiteProfile {
    pub name: String,
    pub landmarks: Vec<LandmarkRule>,
    pub keyword_classes: Vec<KeywordClass>,
    pub editable_fields: Vec<FieldPattern>,
    /// Texts that only appear once the application shell has rendered.
    pub ready_markers: Vec<String>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self::generic()
    }
}

impl SiteProfile {
    pub fn linear() -> Self {
        Self {
            name: "linear".to_string(),
            landmarks: vec![LandmarkRule {
                targets: vec!["projects".to_string()],
                keyword: "workspace".to_string(),
            }],
            keyword_classes: vec![
                KeywordClass {
                    name: "open-creation-surface".to_string(),
                    triggers: vec!["add project".to_string(), "new project".to_string()],
                    texts: vec!["add project".to_string(), "new project".to_string()],
                    labels: vec!["add project".to_string(), "new project".to_string()],
                    class_fingerprints: vec!["hVYWuk".to_string()],
                },
                KeywordClass {
                    name: "confirm-creation".to_string(),
                    triggers: vec!["create project".to_string()],
                    texts: vec!["create project".to_string()],
                    labels: vec!["create project".to_string()],
                    class_fingerprints: vec!["kDGsMb".to_string()],
                },
            ],
            editable_fields: Self::generic_fields_with(vec![FieldPattern::Classes(vec![
                "ProseMirror".to_string(),
                "editor".to_string(),
            ])]),
            ready_markers: vec!["projects".to_string(), "inbox".to_string()],
        }
    }

    /// No landmarks or keyword classes: only the generic text fallback runs.
    pub fn generic() -> Self {
        Self {
            name: "generic".to_string(),
            landmarks: Vec::new(),
            keyword_classes: Vec::new(),
            editable_fields: Self::generic_fields_with(Vec::new()),
            ready_markers: Vec::new(),
        }
    }

    fn generic_fields_with(mut site_specific: Vec<FieldPattern>) -> Vec<FieldPattern> {
        site_specific.extend([
            FieldPattern::Role("textbox".to_string()),
            FieldPattern::ContentEditable,
            FieldPattern::Tag("input".to_string()),
            FieldPattern::Tag("textarea".to_string()),
        ]);
        site_specific
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserOptions {
    pub headless: bool,
    pub window_size: (u32, u32),
    /// Try attaching to a Chrome already listening on this debugging port.
    pub attach_port: Option<u16>,
    pub chrome_path: Option<PathBuf>,
    pub idle_timeout_secs: u64,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            window_size: (1280, 800),
            attach_port: Some(9222),
            chrome_path: None,
            idle_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    pub profile_dir: PathBuf,
    pub state_file: PathBuf,
    pub capture_dir: PathBuf,
    pub browser: BrowserOptions,
    pub timings: Timings,
    pub site: SiteProfile,
}

impl Default for RunConfig {
    fn default() -> Self {
        let base = default_base_dir();
        Self {
            profile_dir: base.join("profile"),
            state_file: base.join("session-state.json"),
            capture_dir: PathBuf::from("captures"),
            browser: BrowserOptions::default(),
            timings: Timings::default(),
            site: SiteProfile::linear(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("uipilot"))
        .unwrap_or_else(|| PathBuf::from(".uipilot"))
}

impl RunConfig {
    /// Load from a JSON file; any field left out keeps its default.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Apply `UIPILOT_*` / `CHROME_PATH` variables, if set.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("UIPILOT_PROFILE_DIR") {
            self.profile_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("UIPILOT_CAPTURE_DIR") {
            self.capture_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("UIPILOT_STATE_FILE") {
            self.state_file = PathBuf::from(file);
        }
        if let Some(path) = lookup("CHROME_PATH") {
            self.browser.chrome_path = Some(PathBuf::from(path));
        }
    }
}
