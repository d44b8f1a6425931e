//! Scripted UI automation for single-page web apps.
//!
//! A [`Plan`] of navigate/click/type/wait steps runs against an [`Engine`].
//! Targets are resolved from a fresh DOM snapshot each time, after-action
//! waits key off a mutation probe injected into the page, and every step leaves
//! screenshots and markup behind in a diagnostics directory.

pub mod config;
pub mod diagnostics;
pub mod dom;
pub mod engine;
pub mod error;
pub mod goal;
pub mod hands;
pub mod instrument;
pub mod interpreter;
pub mod plan;
pub mod resolve;
pub mod runner;
pub mod session;
pub mod stabilize;
pub mod types;

pub use config::{RunConfig, SiteProfile, Timings};
pub use engine::{Engine, EngineResult};
pub use error::{EngineError, Error, PlanError, Result, StepError};
pub use interpreter::{Interpreter, PlanReport, StepOutcome, StepReport};
pub use plan::Plan;
pub use runner::{RunOutcome, execute, run};
pub use types::{Action, ActionRecord};
