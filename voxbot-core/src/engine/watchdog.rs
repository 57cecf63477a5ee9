//! Periodic recovery from stuck recordings and stale UI.
//!
//! A last-resort safety net. In normal operation every session ends through
//! an endpoint, STOP_RECORDING or a state exit, and `check_at` finds nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::arbiter::Arbiter;
use crate::state::{InteractionState, StateMachine};

/// Granularity of the shutdown check while sleeping between passes.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub interval: Duration,
    /// Comfortably above the maximum recording duration.
    pub stuck_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            stuck_threshold: Duration::from_secs(60),
        }
    }
}

/// What one pass repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    pub cleared_session: bool,
    pub returned_to_rest: bool,
    pub cleared_indicator: bool,
}

pub struct Watchdog {
    config: WatchdogConfig,
    arbiter: Arc<Arbiter>,
    state: Arc<StateMachine>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, arbiter: Arc<Arbiter>, state: Arc<StateMachine>) -> Self {
        Self {
            config,
            arbiter,
            state,
        }
    }

    /// One pass at `now`.
    pub fn check_at(&self, now: Instant) -> WatchdogReport {
        let mut report = WatchdogReport::default();

        if self.arbiter.force_clear_if_stuck(now, self.config.stuck_threshold) {
            report.cleared_session = true;
            // Without a session the poller would never leave Listening.
            let rest = self.state.rest_state();
            report.returned_to_rest = self
                .state
                .transition_if(&[InteractionState::Listening], rest);
        }

        let state = self.state.current();
        if self.arbiter.clear_stale_indicator(state.is_capture_adjacent()) {
            warn!(state = state.as_str(), "cleared stale listening indicator");
            self.state.update_text("");
            report.cleared_indicator = true;
        }

        if report != WatchdogReport::default() {
            info!(?report, "watchdog recovered");
        }
        report
    }

    /// Check every `interval` until `running` clears.
    pub fn run(&self, running: &AtomicBool) {
        debug!(
            interval_ms = self.config.interval.as_millis() as u64,
            stuck_secs = self.config.stuck_threshold.as_secs(),
            "watchdog started"
        );
        let mut next = Instant::now() + self.config.interval;
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= next {
                self.check_at(now);
                next = now + self.config.interval;
            }
            std::thread::sleep(SLEEP_SLICE.min(next.saturating_duration_since(now)));
        }
        debug!("watchdog stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::RecordingSource;
    use crate::endpoint::EndpointConfig;
    use crate::state::InteractionState::*;
    use tokio::sync::broadcast;

    fn setup() -> (Watchdog, Arc<Arbiter>, Arc<StateMachine>) {
        let arbiter = Arc::new(Arbiter::new(EndpointConfig::default(), None, 16_000, 16_000));
        let (tx, _rx) = broadcast::channel(16);
        let state = Arc::new(StateMachine::new(true, Arc::clone(&arbiter), tx));
        let dog = Watchdog::new(
            WatchdogConfig::default(),
            Arc::clone(&arbiter),
            Arc::clone(&state),
        );
        (dog, arbiter, state)
    }

    #[test]
    fn stuck_session_is_cleared_and_polling_resumes() {
        let (dog, arbiter, state) = setup();
        let t0 = Instant::now();
        state.transition(WakeDetected);
        state.transition(Listening);
        arbiter.start(RecordingSource::WakeWordTriggered, t0);

        assert_eq!(dog.check_at(t0 + Duration::from_secs(30)), WatchdogReport::default());
        assert!(arbiter.is_recording());

        let report = dog.check_at(t0 + Duration::from_secs(61));
        assert!(report.cleared_session);
        assert!(report.returned_to_rest);
        assert!(!arbiter.is_recording());
        assert_eq!(state.current(), WakeListening);
    }

    #[test]
    fn stale_indicator_is_cleared() {
        let (dog, arbiter, state) = setup();
        arbiter.set_indicator(true);
        assert_eq!(state.current(), WakeListening);

        let report = dog.check_at(Instant::now());
        assert!(report.cleared_indicator);
        assert!(!arbiter.snapshot().indicator_shown);
    }

    #[test]
    fn indicator_in_listening_is_left_alone() {
        let (dog, arbiter, state) = setup();
        state.transition(WakeDetected);
        state.transition(Listening);
        assert!(arbiter.snapshot().indicator_shown);

        assert!(!dog.check_at(Instant::now()).cleared_indicator);
        assert!(arbiter.snapshot().indicator_shown);
    }
}
