//! One complete run: session state in, plan execution, session state out.

use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::diagnostics::Recorder;
use crate::engine::Engine;
use crate::error::Result;
use crate::hands::BrowserSession;
use crate::instrument::Instrumentation;
use crate::interpreter::{Interpreter, PlanReport};
use crate::plan::Plan;
use crate::session::ProfileLock;

#[derive(Debug)]
pub struct RunOutcome {
    pub report: PlanReport,
    pub capture_dir: PathBuf,
    pub log_path: PathBuf,
    pub state_saved: bool,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.report.success()
    }
}

/// Run `plan` on an already open engine. Restores the saved session first and
/// persists it again afterwards, whatever the step outcomes.
pub fn execute<E: Engine + ?Sized>(engine: &E, plan: &Plan, config: &RunConfig) -> Result<RunOutcome> {
    if let Err(e) = engine.restore_state(&config.state_file) {
        warn!(path = %config.state_file.display(), "session restore failed, starting fresh: {e}");
    }

    let mut recorder = Recorder::new(&config.capture_dir)?;
    let probe = Instrumentation::new(engine);
    if let Err(e) = probe.start() {
        warn!("mutation probe unavailable: {e}");
    }

    info!(steps = plan.len(), "executing plan");
    let report = Interpreter::new(engine, &mut recorder, &config.site, &config.timings).run(plan);

    if let Err(e) = probe.stop() {
        warn!("probe teardown failed: {e}");
    }

    let state_saved = match engine.save_state(&config.state_file) {
        Ok(()) => {
            info!(path = %config.state_file.display(), "session state saved");
            true
        }
        Err(e) => {
            warn!("session state not saved: {e}");
            false
        }
    };

    Ok(RunOutcome {
        report,
        capture_dir: recorder.dir().to_path_buf(),
        log_path: recorder.log_path().to_path_buf(),
        state_saved,
    })
}

/// Lock the profile, bring up Chrome and execute. Launch failure is fatal.
pub fn run(config: &RunConfig, plan: &Plan) -> Result<RunOutcome> {
    let _lock = ProfileLock::acquire(&config.profile_dir)?;
    let session = BrowserSession::launch(&config.browser, &config.profile_dir)?;
    execute(&session, plan, config)
}
