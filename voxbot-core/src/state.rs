//! The interaction state machine.
//!
//! `StateMachine::transition` is the only way to change state. It checks the
//! move against the transition table, runs the Listening exit hook through
//! the arbiter and publishes a [`StatusEvent`] for the display.
//!
//! ```text
//! WakeListening ─► WakeDetected ─► Listening ─► Transcribing ─► Answering ─► Speaking
//!   Idle ──────────────────────────┘   ▲                            │           ▲
//!   Idle / WakeListening ─► Camera ────┼────────────────────────────┘ (tool)    │
//!                              └───────┼────────────────────────────────────────┘
//!                    any state ─► rest (WakeListening if wake word enabled, else Idle)
//! ```

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::arbiter::{Arbiter, RecordingSource, StartOutcome};
use crate::ipc::events::StatusEvent;

/// Where the robot is in an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    WakeListening,
    WakeDetected,
    Idle,
    Listening,
    Transcribing,
    Answering,
    Speaking,
    Camera,
}

impl InteractionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WakeListening => "wake_listening",
            Self::WakeDetected => "wake_detected",
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Answering => "answering",
            Self::Speaking => "speaking",
            Self::Camera => "camera",
        }
    }

    /// The rest state for a given wake-word setting.
    pub fn rest(wake_word_enabled: bool) -> Self {
        if wake_word_enabled {
            Self::WakeListening
        } else {
            Self::Idle
        }
    }

    pub fn is_rest(self) -> bool {
        matches!(self, Self::WakeListening | Self::Idle)
    }

    /// States in which the listening indicator legitimately shows.
    pub fn is_capture_adjacent(self) -> bool {
        matches!(self, Self::Listening | Self::WakeDetected)
    }

    /// Default display caption when entering this state.
    pub fn caption(self) -> &'static str {
        match self {
            Self::WakeDetected => "Yes?",
            Self::Listening => "Listening...",
            Self::Transcribing => "Transcribing...",
            Self::Answering => "Thinking...",
            Self::Camera => "Capturing...",
            Self::WakeListening | Self::Idle | Self::Speaking => "",
        }
    }
}

impl std::fmt::Display for InteractionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `from -> to` is in the transition table.
pub fn is_legal(from: InteractionState, to: InteractionState, wake_word_enabled: bool) -> bool {
    use self::InteractionState::*;

    if to == InteractionState::rest(wake_word_enabled) {
        return true;
    }
    matches!(
        (from, to),
        (WakeListening | Idle, Listening | Camera)
            | (WakeListening, WakeDetected)
            | (WakeDetected, Listening)
            | (Listening, Transcribing)
            | (Transcribing, Answering)
            | (Answering, Speaking | Camera)
            | (Camera, Speaking)
    )
}

/// Owner of the current [`InteractionState`].
pub struct StateMachine {
    current: Mutex<InteractionState>,
    wake_word_enabled: bool,
    arbiter: Arc<Arbiter>,
    status_tx: broadcast::Sender<StatusEvent>,
}

impl StateMachine {
    pub fn new(
        wake_word_enabled: bool,
        arbiter: Arc<Arbiter>,
        status_tx: broadcast::Sender<StatusEvent>,
    ) -> Self {
        Self {
            current: Mutex::new(InteractionState::rest(wake_word_enabled)),
            wake_word_enabled,
            arbiter,
            status_tx,
        }
    }

    pub fn current(&self) -> InteractionState {
        *self.current.lock()
    }

    pub fn rest_state(&self) -> InteractionState {
        InteractionState::rest(self.wake_word_enabled)
    }

    pub fn wake_word_enabled(&self) -> bool {
        self.wake_word_enabled
    }

    /// Move to `to` with its default caption. Returns `false` if refused.
    pub fn transition(&self, to: InteractionState) -> bool {
        self.transition_with_text(to, to.caption())
    }

    /// Move to `to`, showing `text` on the display.
    pub fn transition_with_text(&self, to: InteractionState, text: &str) -> bool {
        self.transition_from(None, to, text)
    }

    /// Move to `to` only if the current state is one of `allowed`.
    ///
    /// The check and the write happen under one lock, so two command handlers
    /// cannot both pass a precondition.
    pub fn transition_if(&self, allowed: &[InteractionState], to: InteractionState) -> bool {
        self.transition_from(Some(allowed), to, to.caption())
    }

    /// [`Self::transition_if`] with a custom caption.
    pub fn transition_if_with_text(
        &self,
        allowed: &[InteractionState],
        to: InteractionState,
        text: &str,
    ) -> bool {
        self.transition_from(Some(allowed), to, text)
    }

    /// Enter Listening from one of `allowed` and open a `source` session
    /// under the same state lock, so no RESET or watchdog can run between the
    /// two. If already in Listening (and that is allowed) only the session
    /// start happens. `None` when the current state is not allowed.
    pub fn start_listening(
        &self,
        allowed: &[InteractionState],
        source: RecordingSource,
        now: Instant,
    ) -> Option<StartOutcome> {
        use InteractionState::Listening;

        let (from, outcome) = {
            let mut current = self.current.lock();
            let from = *current;
            if !allowed.contains(&from) {
                return None;
            }
            if from != Listening {
                if !is_legal(from, Listening, self.wake_word_enabled) {
                    warn!(from = from.as_str(), "illegal state transition refused");
                    return None;
                }
                *current = Listening;
                self.arbiter.set_indicator(true);
            }
            (from, self.arbiter.start(source, now))
        };

        if from != Listening {
            info!(from = from.as_str(), to = Listening.as_str(), "state transition");
            let _ = self
                .status_tx
                .send(StatusEvent::new(Listening, Listening.caption()));
        }
        Some(outcome)
    }

    /// Return to the rest state. Always legal.
    pub fn return_to_rest(&self) {
        let rest = self.rest_state();
        self.transition_with_text(rest, "");
    }

    /// Publish a caption update without changing state.
    pub fn update_text(&self, text: &str) {
        let _ = self.status_tx.send(StatusEvent::new(self.current(), text));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn status_sender(&self) -> broadcast::Sender<StatusEvent> {
        self.status_tx.clone()
    }

    fn transition_from(
        &self,
        allowed: Option<&[InteractionState]>,
        to: InteractionState,
        text: &str,
    ) -> bool {
        let from = {
            let mut current = self.current.lock();
            let from = *current;
            if allowed.is_some_and(|states| !states.contains(&from)) {
                return false;
            }
            if !is_legal(from, to, self.wake_word_enabled) {
                warn!(from = from.as_str(), to = to.as_str(), "illegal state transition refused");
                return false;
            }
            *current = to;

            // Exit hook. Lock order is state, then arbiter; the arbiter never
            // calls back into the state machine.
            if from == InteractionState::Listening {
                self.arbiter.clear_for_exit();
            }
            if to == InteractionState::Listening {
                self.arbiter.set_indicator(true);
            }
            from
        };

        info!(from = from.as_str(), to = to.as_str(), "state transition");
        let _ = self.status_tx.send(StatusEvent::new(to, text));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointConfig;
    use super::InteractionState::*;

    fn machine(wake: bool) -> (StateMachine, Arc<Arbiter>, broadcast::Receiver<StatusEvent>) {
        let arbiter = Arc::new(Arbiter::new(EndpointConfig::default(), None, 48_000, 16_000));
        let (tx, rx) = broadcast::channel(16);
        (StateMachine::new(wake, Arc::clone(&arbiter), tx), arbiter, rx)
    }

    #[test]
    fn initial_state_follows_wake_word_setting() {
        assert_eq!(machine(true).0.current(), WakeListening);
        assert_eq!(machine(false).0.current(), Idle);
    }

    #[test]
    fn transition_table() {
        assert!(is_legal(WakeListening, WakeDetected, true));
        assert!(is_legal(Idle, Listening, false));
        assert!(is_legal(Answering, Camera, true));
        assert!(is_legal(Camera, Speaking, true));
        assert!(is_legal(Speaking, WakeListening, true));
        assert!(is_legal(Transcribing, Idle, false));

        assert!(!is_legal(Idle, WakeDetected, false));
        assert!(!is_legal(Listening, Speaking, true));
        assert!(!is_legal(Speaking, Listening, true));
        assert!(!is_legal(Camera, Answering, true));
        // Idle is not a rest state when the wake word is on.
        assert!(!is_legal(Speaking, Idle, true));
    }

    #[test]
    fn illegal_transition_is_refused_and_state_kept() {
        let (sm, _, mut rx) = machine(true);
        assert!(!sm.transition(Speaking));
        assert_eq!(sm.current(), WakeListening);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn leaving_listening_runs_exit_hook() {
        let (sm, arbiter, _rx) = machine(false);
        assert!(sm.transition(Listening));
        arbiter.start(RecordingSource::ButtonTriggered, Instant::now());
        assert!(arbiter.snapshot().indicator_shown);

        sm.return_to_rest();
        assert!(!arbiter.is_recording());
        assert!(!arbiter.snapshot().indicator_shown);
    }

    #[test]
    fn every_transition_publishes_status() {
        let (sm, _, mut rx) = machine(true);
        sm.transition(WakeDetected);
        sm.transition(Listening);
        sm.transition(Transcribing);

        let states: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.state)
            .collect();
        assert_eq!(states, vec![WakeDetected, Listening, Transcribing]);
    }

    #[test]
    fn conditional_transition_checks_precondition() {
        let (sm, _, _rx) = machine(true);
        assert!(!sm.transition_if(&[Listening], Transcribing));
        assert!(sm.transition_if(&[Idle, WakeListening], Listening));
        assert_eq!(sm.current(), Listening);
    }

    #[test]
    fn start_listening_enters_state_and_session_together() {
        let (sm, arbiter, mut rx) = machine(false);
        let now = Instant::now();

        assert_eq!(
            sm.start_listening(&[Idle], RecordingSource::ButtonTriggered, now),
            Some(StartOutcome::Started)
        );
        assert_eq!(sm.current(), Listening);
        assert_eq!(arbiter.current_source(), Some(RecordingSource::ButtonTriggered));
        assert!(arbiter.snapshot().indicator_shown);
        assert_eq!(rx.try_recv().map(|e| e.state).ok(), Some(Listening));

        // Already listening: only the session is touched, nothing is published.
        assert_eq!(
            sm.start_listening(&[Listening], RecordingSource::ButtonTriggered, now),
            Some(StartOutcome::AlreadyRecording)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn start_listening_outside_allowed_states_opens_no_session() {
        let (sm, arbiter, _rx) = machine(true);
        let started = sm.start_listening(
            &[WakeDetected],
            RecordingSource::WakeWordTriggered,
            Instant::now(),
        );
        assert_eq!(started, None);
        assert_eq!(sm.current(), WakeListening);
        assert!(!arbiter.is_recording());
    }

    #[test]
    fn reset_racing_a_start_never_leaves_a_session_at_rest() {
        for _ in 0..200 {
            let (sm, arbiter, _rx) = machine(false);
            let sm = Arc::new(sm);
            let starter = {
                let sm = Arc::clone(&sm);
                std::thread::spawn(move || {
                    sm.start_listening(&[Idle], RecordingSource::ButtonTriggered, Instant::now())
                })
            };
            sm.return_to_rest();
            starter.join().unwrap();

            if sm.current() != Listening {
                assert!(!arbiter.is_recording());
            }
        }
    }
}
