//! Wake-word scoring interface and the mute/cooldown gate around it.
//!
//! The classifier itself is a collaborator: anything that turns 16 kHz
//! frames into per-keyword scores can implement [`WakeWordModel`]. The
//! poller owns the model; [`WakeGate`] is shared with whoever drives speech
//! output so the robot cannot wake itself up with its own voice.

pub mod energy;

pub use energy::EnergySpikeModel;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// One keyword's confidence for the latest window.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordScore {
    pub keyword: String,
    /// Confidence in [0, 1].
    pub score: f32,
}

/// A wake-word classifier.
pub trait WakeWordModel: Send + 'static {
    /// Samples (at the target rate) the model wants per call.
    fn frame_len(&self) -> usize;

    /// Score one window of `frame_len` samples.
    fn score(&mut self, frame: &[f32]) -> Vec<KeywordScore>;

    /// Drop internal buffers (between sessions).
    fn reset(&mut self);
}

/// Highest-scoring keyword in a batch.
pub fn best_score(scores: &[KeywordScore]) -> Option<&KeywordScore> {
    scores.iter().max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Feedback-loop suppression shared between the poller and speech output.
///
/// `paused` blocks classification entirely while the robot is talking. The
/// cooldown window ("ignore detections until T") covers echo and the tail
/// of playback after it stops.
#[derive(Debug, Default)]
pub struct WakeGate {
    paused: AtomicBool,
    cooldown_until: Mutex<Option<Instant>>,
}

impl WakeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Unpause and ignore detections for `cooldown` from `now`.
    pub fn resume_with_cooldown(&self, now: Instant, cooldown: Duration) {
        self.start_cooldown(now, cooldown);
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn start_cooldown(&self, now: Instant, cooldown: Duration) {
        *self.cooldown_until.lock() = Some(now + cooldown);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.lock().is_some_and(|until| now < until)
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        *self.cooldown_until.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_score_picks_maximum() {
        let scores = vec![
            KeywordScore { keyword: "hey_robot".into(), score: 0.2 },
            KeywordScore { keyword: "shatrox".into(), score: 0.92 },
        ];
        assert_eq!(best_score(&scores).map(|s| s.keyword.as_str()), Some("shatrox"));
        assert!(best_score(&[]).is_none());
    }

    #[test]
    fn gate_cooldown_window() {
        let gate = WakeGate::new();
        let t0 = Instant::now();
        assert!(!gate.in_cooldown(t0));

        gate.pause();
        assert!(gate.is_paused());
        gate.resume_with_cooldown(t0, Duration::from_secs(2));
        assert!(!gate.is_paused());
        assert!(gate.in_cooldown(t0 + Duration::from_millis(1999)));
        assert!(!gate.in_cooldown(t0 + Duration::from_secs(2)));
    }
}
