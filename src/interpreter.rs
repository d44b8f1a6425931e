//! Runs a plan step by step against an [`Engine`].
//!
//! Per step: a "pre" snapshot, dispatch by kind, a stabilization wait (except
//! after `wait`, which is its own settle), then a "post" snapshot when the step
//! succeeded. Step failures are recorded and swallowed; every remaining step is
//! always attempted.

use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{SiteProfile, Timings};
use crate::diagnostics::{Context, Phase, Recorder};
use crate::dom::{self, DomSnapshot};
use crate::engine::Engine;
use crate::error::{EngineError, StepError};
use crate::instrument::Instrumentation;
use crate::plan::Plan;
use crate::resolve::{self, Resolution, Strategy, normalize};
use crate::stabilize::{self, Settle, StabilizeConfig, wait_for_settle};
use crate::types::{Action, ActionKind, ActionRecord, OverlayDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    StepSucceeded,
    StepFailed,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded,
    /// The action was not attempted (nothing to act on).
    Skipped(StepError),
    /// The action was attempted and rejected.
    Failed(StepError),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }

    pub fn error(&self) -> Option<&StepError> {
        match self {
            StepOutcome::Succeeded => None,
            StepOutcome::Skipped(e) | StepOutcome::Failed(e) => Some(e),
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Succeeded => write!(f, "ok"),
            StepOutcome::Skipped(e) => write!(f, "skipped: {e}"),
            StepOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub index: usize,
    pub kind: ActionKind,
    pub description: String,
    pub gating: bool,
    pub outcome: StepOutcome,
    pub strategy: Option<Strategy>,
    pub settle: Option<Settle>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlanReport {
    pub steps: Vec<StepReport>,
    pub diagnostics: usize,
}

impl PlanReport {
    /// True iff every gating step succeeded.
    pub fn success(&self) -> bool {
        self.steps
            .iter()
            .filter(|s| s.gating)
            .all(|s| s.outcome.is_success())
    }

    pub fn failed_gating(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| s.gating && !s.outcome.is_success())
    }

    /// Human-readable summary, one line per step.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for s in &self.steps {
            let mark = match (&s.outcome, s.gating) {
                (StepOutcome::Succeeded, _) => "ok  ",
                (_, true) => "FAIL",
                (_, false) => "warn",
            };
            out.push_str(&format!(
                "[{mark}] {:>2}. {}: {}\n",
                s.index + 1,
                s.description,
                s.outcome
            ));
        }
        let verdict = if self.success() {
            "all gating steps succeeded"
        } else {
            "at least one gating step failed"
        };
        out.push_str(&format!(
            "{verdict} ({} diagnostic snapshots)\n",
            self.diagnostics
        ));
        out
    }
}

pub struct Interpreter<'a, E: Engine + ?Sized> {
    engine: &'a E,
    probe: Instrumentation<'a, E>,
    recorder: &'a mut Recorder,
    site: &'a SiteProfile,
    timings: &'a Timings,
    state: RunState,
    overlays: Vec<OverlayDescriptor>,
}

impl<'a, E: Engine + ?Sized> Interpreter<'a, E> {
    pub fn new(
        engine: &'a E,
        recorder: &'a mut Recorder,
        site: &'a SiteProfile,
        timings: &'a Timings,
    ) -> Self {
        Self {
            engine,
            probe: Instrumentation::new(engine),
            recorder,
            site,
            timings,
            state: RunState::Idle,
            overlays: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute every step in order. Never aborts mid-plan.
    pub fn run(&mut self, plan: &Plan) -> PlanReport {
        let first_entry = self.recorder.entries().len();
        let mut steps = Vec::with_capacity(plan.len());

        for (index, record) in plan.steps().iter().enumerate() {
            self.state = RunState::Running;
            let report = self.run_step(index, record);
            self.state = if report.outcome.is_success() {
                RunState::StepSucceeded
            } else {
                RunState::StepFailed
            };
            steps.push(report);
        }

        self.state = RunState::Finished;
        PlanReport {
            steps,
            diagnostics: self.recorder.entries().len() - first_entry,
        }
    }

    fn run_step(&mut self, index: usize, record: &ActionRecord) -> StepReport {
        info!(step = index, action = %record.action.describe(), "running step");
        let context = self.context(None);
        self.recorder
            .capture(self.engine, index, record, Phase::Pre, context);

        let (outcome, strategy) = match &record.action {
            Action::Navigate { url } => (self.navigate(index, record, url), None),
            Action::Click { target } => self.click(index, record, target),
            Action::Type { target, text } => self.type_into(index, record, target, text),
            Action::Wait { duration } => (self.wait(*duration), None),
            Action::Invalid { declared, reason } => {
                warn!(step = index, "skipping invalid {declared} record: {reason}");
                let error = StepError::InvalidAction {
                    declared: declared.clone(),
                    reason: reason.clone(),
                };
                self.evidence(index, record, Phase::Failed, &error);
                (StepOutcome::Failed(error), None)
            }
        };

        let settle = match record.action {
            Action::Wait { .. } | Action::Invalid { .. } => None,
            _ => Some(self.settle(index)),
        };

        if outcome.is_success() && !matches!(record.action, Action::Wait { .. }) {
            let context = self.context(None);
            self.recorder
                .capture(self.engine, index, record, Phase::Post, context);
        }

        match &outcome {
            StepOutcome::Succeeded => info!(step = index, "step succeeded"),
            other => warn!(step = index, "step {other}"),
        }

        StepReport {
            index,
            kind: record.action.kind(),
            description: record.action.describe(),
            gating: record.gating,
            outcome,
            strategy,
            settle,
        }
    }

    fn navigate(&mut self, index: usize, record: &ActionRecord, url: &str) -> StepOutcome {
        info!(step = index, url, "navigating");
        match self.engine.navigate(url) {
            Ok(()) => {}
            Err(EngineError::Timeout(message)) => {
                warn!(step = index, "navigation did not signal ready, proceeding: {message}");
            }
            Err(e) => {
                let error = StepError::NavigationTimeout {
                    url: url.to_string(),
                    message: e.to_string(),
                };
                self.evidence(index, record, Phase::Failed, &error);
                return StepOutcome::Failed(error);
            }
        }

        sleep_ms(self.timings.navigate_settle);
        if let Err(e) = self.probe.start() {
            debug!(step = index, "probe install failed: {e}");
        }
        self.overlays.clear();
        self.await_ready(index);
        StepOutcome::Succeeded
    }

    /// Advisory: poll for one of the profile's ready markers, dump visible text
    /// when none shows up.
    fn await_ready(&self, index: usize) {
        let markers: Vec<String> = self.site.ready_markers.iter().map(|m| normalize(m)).collect();
        if markers.is_empty() {
            return;
        }
        let attempts = self.timings.ready_attempts.max(1);
        for attempt in 1..=attempts {
            if let Ok(snapshot) = dom::capture_snapshot(self.engine) {
                if has_ready_marker(&snapshot, &markers) {
                    debug!(step = index, attempt, "page shell ready");
                    return;
                }
            }
            if attempt < attempts {
                debug!(step = index, "page not ready yet ({attempt}/{attempts})");
                sleep_ms(self.timings.ready_interval);
            }
        }
        let snippets = dom::visible_text_snippets(self.engine);
        warn!(step = index, ?snippets, "no ready marker found, continuing anyway");
    }

    fn click(
        &mut self,
        index: usize,
        record: &ActionRecord,
        target: &str,
    ) -> (StepOutcome, Option<Strategy>) {
        let resolution = self.resolve_with_wait(index, target);
        let strategy = resolution.strategy();
        let Some(selector) = resolution.selector() else {
            let error = StepError::ResolutionMiss {
                target: target.to_string(),
            };
            self.evidence(index, record, Phase::NotFound, &error);
            return (StepOutcome::Skipped(error), None);
        };
        info!(step = index, target, selector, ?strategy, "resolved");

        let result = self
            .engine
            .scroll_into_view(selector)
            .and_then(|()| {
                sleep_ms(self.timings.scroll_pause);
                self.engine.click(selector)
            });

        match result {
            Ok(()) => (StepOutcome::Succeeded, strategy),
            Err(e) => {
                let error = StepError::InteractionFailure {
                    target: target.to_string(),
                    message: e.to_string(),
                };
                self.evidence(index, record, Phase::Failed, &error);
                (StepOutcome::Failed(error), strategy)
            }
        }
    }

    /// Re-snapshot until `target` resolves or the wait budget is spent.
    fn resolve_with_wait(&self, index: usize, target: &str) -> Resolution {
        let deadline =
            stabilize::deadline_after(Duration::from_millis(self.timings.resolve_wait));
        let poll = Duration::from_millis(self.timings.resolve_poll.max(10));
        loop {
            let resolution = match dom::capture_snapshot(self.engine) {
                Ok(snapshot) => resolve::resolve(&snapshot, target, self.site),
                Err(e) => {
                    warn!(step = index, "dom snapshot failed: {e}");
                    Resolution::Unresolved {
                        target: target.to_string(),
                    }
                }
            };
            let now = Instant::now();
            if resolution.is_resolved() || now >= deadline {
                return resolution;
            }
            debug!(step = index, target, "not resolvable yet");
            std::thread::sleep(poll.min(deadline - now));
        }
    }

    fn type_into(
        &mut self,
        index: usize,
        record: &ActionRecord,
        target: &str,
        text: &str,
    ) -> (StepOutcome, Option<Strategy>) {
        // Give the modal/editor time to open.
        sleep_ms(self.timings.editor_appear);

        let resolution = match dom::capture_snapshot(self.engine) {
            Ok(snapshot) => {
                resolve::find_editable(&snapshot, Some(target), &self.site.editable_fields)
            }
            Err(e) => {
                warn!(step = index, "dom snapshot failed: {e}");
                Resolution::Unresolved {
                    target: target.to_string(),
                }
            }
        };
        let Some(selector) = resolution.selector() else {
            let error = StepError::ResolutionMiss {
                target: target.to_string(),
            };
            self.evidence(index, record, Phase::NotFound, &error);
            return (StepOutcome::Skipped(error), None);
        };
        info!(step = index, target, selector, "typing into field");

        let focused = self
            .engine
            .click(selector)
            .or_else(|_| self.engine.focus(selector));
        if let Err(e) = focused {
            let error = StepError::InteractionFailure {
                target: target.to_string(),
                message: e.to_string(),
            };
            self.evidence(index, record, Phase::Failed, &error);
            return (StepOutcome::Failed(error), resolution.strategy());
        }

        match dom::clear_focused(self.engine) {
            Ok(cleared) => debug!(step = index, cleared, "cleared field"),
            Err(e) => debug!(step = index, "clearing field failed: {e}"),
        }

        let base = self.timings.keystroke_delay;
        let jitter = self.timings.keystroke_jitter;
        let delay = move || {
            let extra = if jitter > 0 {
                (rand::random::<f32>() * jitter as f32) as u64
            } else {
                0
            };
            Duration::from_millis(base + extra)
        };

        match self.engine.type_text(text, &delay) {
            Ok(()) => (StepOutcome::Succeeded, resolution.strategy()),
            Err(e) => {
                let error = StepError::InteractionFailure {
                    target: target.to_string(),
                    message: e.to_string(),
                };
                self.evidence(index, record, Phase::Failed, &error);
                (StepOutcome::Failed(error), resolution.strategy())
            }
        }
    }

    fn wait(&self, duration: Duration) -> StepOutcome {
        info!(
            seconds = duration.as_secs_f64(),
            "waiting (manual intervention window)"
        );
        std::thread::sleep(duration);
        StepOutcome::Succeeded
    }

    fn settle(&mut self, index: usize) -> Settle {
        let settle = wait_for_settle(&self.probe, &StabilizeConfig::from(self.timings));
        if !settle.is_quiet() {
            debug!(step = index, "dom still busy, proceeding");
        }

        let overlays = self.probe.overlays();
        for overlay in overlays.iter().filter(|o| !self.overlays.contains(o)) {
            info!(
                step = index,
                tag = %overlay.tag,
                role = overlay.role.as_deref().unwrap_or("-"),
                z = overlay.stack_order,
                "overlay appeared"
            );
        }
        self.overlays = overlays;
        settle
    }

    fn evidence(&mut self, index: usize, record: &ActionRecord, phase: Phase, error: &StepError) {
        let context = self.context(Some(error.to_string()));
        self.recorder
            .capture(self.engine, index, record, phase, context);
    }

    fn context(&self, note: Option<String>) -> Context {
        match self.probe.read() {
            Ok(state) => Context {
                signal: state.signal,
                overlays: state.overlays,
                note,
            },
            Err(_) => Context {
                note,
                ..Default::default()
            },
        }
    }
}

fn has_ready_marker(snapshot: &DomSnapshot, markers: &[String]) -> bool {
    snapshot.nodes.iter().any(|n| {
        markers.contains(&normalize(&n.text)) && snapshot.is_rendered(n.uid)
    })
}

fn sleep_ms(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
