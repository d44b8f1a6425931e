use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Timings;
use crate::engine::EngineResult;
use crate::types::MutationSignal;

/// Anything that can report the latest DOM mutation signal.
pub trait SignalSource {
    fn sample(&self) -> EngineResult<Option<MutationSignal>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizeConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub quiet_window: Duration,
    pub grace: Duration,
}

impl Default for StabilizeConfig {
    fn default() -> Self {
        Self::from(&Timings::default())
    }
}

impl From<&Timings> for StabilizeConfig {
    fn from(t: &Timings) -> Self {
        Self {
            poll_interval: Timings::ms(t.stabilize_poll),
            timeout: Timings::ms(t.stabilize_timeout),
            quiet_window: Timings::ms(t.quiet_window),
            grace: Timings::ms(t.grace),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Settle {
    /// A quiet window of at least `quiet_for` was observed.
    Quiet { quiet_for: Duration, waited: Duration },
    /// The timeout elapsed first. Advisory only.
    TimedOut { waited: Duration },
}

impl Settle {
    pub fn is_quiet(&self) -> bool {
        matches!(self, Settle::Quiet { .. })
    }
}

/// Longest a single wait may run, whatever the configured timeout.
pub const LONGEST_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// `timeout` from now, capped at [`LONGEST_WAIT`].
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(LONGEST_WAIT)).unwrap_or(now)
}

/// Poll `source` until the DOM has been quiet for `quiet_window`, then wait
/// `grace`. Never blocks past `timeout`; sample errors count as "not quiet".
pub fn wait_for_settle<S: SignalSource + ?Sized>(source: &S, cfg: &StabilizeConfig) -> Settle {
    let started = Instant::now();
    let deadline = deadline_after(cfg.timeout);

    loop {
        match source.sample() {
            Ok(Some(signal)) => {
                let quiet_for = signal.quiet_for();
                if quiet_for >= cfg.quiet_window {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    std::thread::sleep(cfg.grace.min(remaining));
                    let waited = started.elapsed();
                    debug!(?quiet_for, ?waited, "dom settled");
                    return Settle::Quiet { quiet_for, waited };
                }
            }
            Ok(None) => {}
            Err(e) => debug!("mutation signal unavailable: {e}"),
        }

        let now = Instant::now();
        if now >= deadline {
            let waited = started.elapsed();
            debug!(?waited, "dom did not settle before timeout");
            return Settle::TimedOut { waited };
        }
        std::thread::sleep(cfg.poll_interval.min(deadline - now));
    }
}
