//! End-of-utterance decision logic.
//!
//! The detector never looks at audio itself. Each frame arrives with an
//! optional VAD label (absent when no VAD is configured) and a timestamp;
//! the detector tracks when speech was last heard and decides whether the
//! utterance is over.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::vad::VadDecision;

/// Why a recording session ended on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointReason {
    /// Speech was heard and then silence lasted at least the threshold.
    Silence,
    /// The session reached the maximum recording duration.
    HardCap,
}

/// Timing parameters shared by every session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointConfig {
    pub silence_threshold: Duration,
    pub max_recording: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            silence_threshold: Duration::from_millis(1500),
            max_recording: Duration::from_secs(10),
        }
    }
}

/// Per-session endpointing state.
#[derive(Debug, Clone)]
pub struct EndpointDetector {
    config: EndpointConfig,
    session_start: Instant,
    last_speech_at: Option<Instant>,
    speech_started: bool,
    /// Button sessions end on release, so silence never closes them.
    end_on_silence: bool,
}

impl EndpointDetector {
    pub fn new(config: EndpointConfig, session_start: Instant, end_on_silence: bool) -> Self {
        Self {
            config,
            session_start,
            last_speech_at: None,
            speech_started: false,
            end_on_silence,
        }
    }

    /// Feed one frame observed at `now`. `label` is `None` when no VAD runs,
    /// in which case only the hard cap can end the session.
    pub fn observe(&mut self, label: Option<VadDecision>, now: Instant) -> Option<EndpointReason> {
        if label.is_some_and(VadDecision::is_speech) {
            if !self.speech_started {
                self.speech_started = true;
                debug!(
                    after_ms = now.saturating_duration_since(self.session_start).as_millis() as u64,
                    "speech started"
                );
            }
            self.last_speech_at = Some(now);
        }

        if now.saturating_duration_since(self.session_start) >= self.config.max_recording {
            return Some(EndpointReason::HardCap);
        }

        if self.end_on_silence && self.speech_started {
            if let Some(last) = self.last_speech_at {
                if now.saturating_duration_since(last) >= self.config.silence_threshold {
                    return Some(EndpointReason::Silence);
                }
            }
        }

        None
    }

    pub fn speech_started(&self) -> bool {
        self.speech_started
    }

    pub fn session_start(&self) -> Instant {
        self.session_start
    }
}
