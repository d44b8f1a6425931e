use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a single plan step asks the engine to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Navigate {
        url: String,
    },
    Click {
        target: String,
    },
    Type {
        target: String,
        text: String,
    },
    Wait {
        #[serde(with = "duration_secs")]
        duration: Duration,
    },
    /// A record that lacked a field its kind requires. Kept in the plan so the
    /// run can report it at its position instead of silently dropping it.
    Invalid {
        declared: String,
        reason: String,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Navigate { .. } => ActionKind::Navigate,
            Action::Click { .. } => ActionKind::Click,
            Action::Type { .. } => ActionKind::Type,
            Action::Wait { .. } => ActionKind::Wait,
            Action::Invalid { .. } => ActionKind::Invalid,
        }
    }

    /// Human-readable target, used for labels and summaries.
    pub fn describe(&self) -> String {
        match self {
            Action::Navigate { url } => format!("goto {url}"),
            Action::Click { target } => format!("click \"{target}\""),
            Action::Type { target, text } => format!("type \"{text}\" into \"{target}\""),
            Action::Wait { duration } => format!("wait {:.1}s", duration.as_secs_f64()),
            Action::Invalid { declared, reason } => format!("invalid {declared} ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    Wait,
    Invalid,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Wait => "wait",
            ActionKind::Invalid => "invalid",
        }
    }
}

/// One step of a plan. Order in the plan is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(flatten)]
    pub action: Action,
    /// Whether the plan's aggregate success depends on this step.
    pub gating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ActionRecord {
    pub fn new(action: Action) -> Self {
        let gating = !matches!(action, Action::Wait { .. });
        Self {
            action,
            gating,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// File-name safe label for captures, e.g. `click_add_project`.
    pub fn slug(&self) -> String {
        let raw = match (&self.label, &self.action) {
            (Some(label), _) => label.clone(),
            (None, Action::Click { target }) => format!("click {target}"),
            (None, Action::Type { target, .. }) => format!("type {target}"),
            (None, action) => action.kind().as_str().to_string(),
        };
        slugify(&raw)
    }
}

pub fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "step".to_string()
    } else {
        trimmed.chars().take(48).collect()
    }
}

/// Current DOM activity as reported by the in-page probe.
///
/// Timestamps are page-clock milliseconds; `sampled_at` is read in the same
/// evaluation as `last_change_timestamp`, so the difference is skew-free.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationSignal {
    pub last_change_timestamp: f64,
    pub added_count: u64,
    pub removed_count: u64,
    pub attribute_change_count: u64,
    pub sampled_at: f64,
}

impl MutationSignal {
    pub fn quiet_for(&self) -> Duration {
        let ms = (self.sampled_at - self.last_change_timestamp).max(0.0);
        Duration::from_millis(ms as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A large fixed/absolute region, most likely a modal or dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayDescriptor {
    pub tag: String,
    pub stack_order: i64,
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub role: Option<String>,
}

/// The element type that most recently received focus.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusRecord {
    pub tag: String,
    #[serde(default)]
    pub role: Option<String>,
    pub time: f64,
}

pub const MARKUP_TRUNCATE_CHARS: usize = 2_000_000;

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs.max(0.0)).map_err(serde::de::Error::custom)
    }
}
