//! Free-text goal to plan, for the one goal shape we understand:
//! "create a project named Foo".

use chrono::Utc;

use crate::error::PlanError;
use crate::plan::Plan;
use crate::types::{Action, ActionRecord};

pub const DEFAULT_APP_URL: &str = "https://linear.app/";

/// The name following "project", optionally after "called"/"named".
/// Matching is case-insensitive; the name keeps the case it was written in.
pub fn extract_project_name(goal: &str) -> Option<String> {
    let lower = goal.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("project ") {
        let start = from + pos + "project ".len();
        from = start;

        let mut rest = &goal[start..];
        let rest_lower = &lower[start..];
        for filler in ["called", "named"] {
            if rest_lower.starts_with(filler) {
                rest = &rest[filler.len()..];
                break;
            }
        }
        let rest = rest.trim_start();
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if !name.is_empty() {
            return Some(name);
        }
    }
    None
}

/// `Auto_NNNN` from the low digits of the clock.
pub fn fallback_name() -> String {
    format!("Auto_{:04}", Utc::now().timestamp_millis().rem_euclid(10_000))
}

/// goto, open Projects, open the creation surface, type the name, confirm.
pub fn create_project_plan(url: &str, name: &str) -> Result<Plan, PlanError> {
    let steps = vec![
        ActionRecord::new(Action::Navigate {
            url: url.to_string(),
        })
        .with_label("dashboard_loaded"),
        ActionRecord::new(Action::Click {
            target: "Projects".to_string(),
        })
        .with_label("projects_opened"),
        ActionRecord::new(Action::Click {
            target: "Add project".to_string(),
        })
        .with_label("add_project_clicked"),
        ActionRecord::new(Action::Type {
            target: "project name".to_string(),
            text: name.to_string(),
        })
        .with_label("name_typed"),
        ActionRecord::new(Action::Click {
            target: "Create project".to_string(),
        })
        .with_label("project_created"),
    ];
    Plan::new(steps)
}
