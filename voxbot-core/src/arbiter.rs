//! The recording arbiter: single source of truth for "who is recording".
//!
//! Everything recording-related lives behind one `parking_lot::Mutex`: the
//! optional [`RecordingSession`], the VAD instance and the listening
//! indicator. Button and wake-word triggers race for it from different
//! threads; the priority rules in [`Arbiter::start`] decide every race
//! deterministically, so a conflict is an outcome and never an error.
//!
//! Work that can take time (flattening the buffer, measuring it) happens
//! after the lock is released in [`Arbiter::stop`], so the poller thread
//! appending frames never waits on a turn in progress.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::buffering::chunk::AudioChunk;
use crate::endpoint::{EndpointConfig, EndpointDetector, EndpointReason};
use crate::vad::VoiceActivityDetector;

/// Who asked for the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingSource {
    /// Physical button, relayed through the command socket.
    ButtonTriggered,
    /// Wake-word detection on the poller thread.
    WakeWordTriggered,
}

impl RecordingSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ButtonTriggered => "button_triggered",
            Self::WakeWordTriggered => "wake_word_triggered",
        }
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// No session existed; a new one began.
    Started,
    /// A button session is already running. Idempotent no-op.
    AlreadyRecording,
    /// A button start replaced a wake-word session, discarding its audio.
    TookOver,
    /// A wake-word start arrived while a session was active.
    Rejected,
}

impl StartOutcome {
    /// `true` when a session owned by the requester is now active.
    pub fn is_recording(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// One in-progress capture. Exclusively owned by the arbiter.
#[derive(Debug)]
pub struct RecordingSession {
    pub source: RecordingSource,
    pub started_at: Instant,
    /// Raw native-rate frames in arrival order.
    frames: Vec<Vec<f32>>,
    endpointer: EndpointDetector,
}

/// A finished capture, moved out of the arbiter by [`Arbiter::stop`].
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    pub source: RecordingSource,
    /// Mono samples at `sample_rate` (the native capture rate).
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub started_at: Instant,
    pub duration: Duration,
    /// Whether the VAD labelled any frame as speech.
    pub speech_detected: bool,
    /// Whether a VAD ran at all. Without one, `speech_detected` means nothing.
    pub vad_used: bool,
}

impl CapturedAudio {
    /// Too short, or a VAD ran and heard nothing.
    pub fn is_no_speech(&self, min_duration: Duration) -> bool {
        self.samples.is_empty()
            || self.duration < min_duration
            || (self.vad_used && !self.speech_detected)
    }
}

/// Point-in-time view for STATUS replies and the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterSnapshot {
    pub source: Option<RecordingSource>,
    pub started_at: Option<Instant>,
    pub buffered_frames: usize,
    pub indicator_shown: bool,
}

struct Inner {
    session: Option<RecordingSession>,
    vad: Option<Box<dyn VoiceActivityDetector>>,
    /// The user-facing "listening" indicator.
    indicator: bool,
}

impl Inner {
    fn reset_vad(&mut self) {
        if let Some(vad) = self.vad.as_mut() {
            vad.reset();
        }
    }

    fn begin(&mut self, source: RecordingSource, now: Instant, config: EndpointConfig) {
        self.reset_vad();
        self.session = Some(RecordingSession {
            source,
            started_at: now,
            frames: Vec::new(),
            endpointer: EndpointDetector::new(
                config,
                now,
                source == RecordingSource::WakeWordTriggered,
            ),
        });
        self.indicator = true;
    }
}

/// Guards the process-wide recording session.
pub struct Arbiter {
    inner: Mutex<Inner>,
    endpoint: EndpointConfig,
    native_rate: u32,
    vad_rate: u32,
}

impl Arbiter {
    /// `vad` is `None` when voice activity detection is disabled; sessions
    /// then end on the hard cap (wake word) or on release (button).
    pub fn new(
        endpoint: EndpointConfig,
        vad: Option<Box<dyn VoiceActivityDetector>>,
        native_rate: u32,
        vad_rate: u32,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                session: None,
                vad,
                indicator: false,
            }),
            endpoint,
            native_rate,
            vad_rate,
        }
    }

    /// Request a recording session on behalf of `source`.
    pub fn start(&self, source: RecordingSource, now: Instant) -> StartOutcome {
        let mut inner = self.inner.lock();
        let current = inner.session.as_ref().map(|s| s.source);

        let outcome = match (current, source) {
            (None, _) => StartOutcome::Started,
            (Some(RecordingSource::ButtonTriggered), RecordingSource::ButtonTriggered) => {
                StartOutcome::AlreadyRecording
            }
            (Some(RecordingSource::WakeWordTriggered), RecordingSource::ButtonTriggered) => {
                StartOutcome::TookOver
            }
            (Some(_), RecordingSource::WakeWordTriggered) => StartOutcome::Rejected,
        };

        match outcome {
            StartOutcome::Started | StartOutcome::TookOver => {
                if let Some(old) = inner.session.as_ref() {
                    info!(
                        discarded_frames = old.frames.len(),
                        "button took over wake-word session"
                    );
                }
                inner.begin(source, now, self.endpoint);
                info!(source = source.as_str(), "recording session started");
            }
            StartOutcome::AlreadyRecording => debug!("button start while already recording"),
            StartOutcome::Rejected => debug!("wake-word start rejected, session active"),
        }
        outcome
    }

    /// Append one frame to the active session and run endpointing.
    ///
    /// `raw` is buffered at the native rate; `resampled` is what the VAD sees.
    /// Returns `None` when no session is active or the utterance continues.
    pub fn ingest(&self, raw: &[f32], resampled: &[f32], now: Instant) -> Option<EndpointReason> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let session = inner.session.as_mut()?;

        session.frames.push(raw.to_vec());
        let label = inner
            .vad
            .as_mut()
            .map(|vad| vad.classify(&AudioChunk::new(resampled.to_vec(), self.vad_rate)));
        session.endpointer.observe(label, now)
    }

    /// End the active session and hand its audio over.
    ///
    /// Returns `None` (and logs) when nothing was recording.
    pub fn stop(&self) -> Option<CapturedAudio> {
        let session = {
            let mut inner = self.inner.lock();
            let taken = inner.session.take();
            inner.reset_vad();
            taken
        };

        let Some(session) = session else {
            info!("stop requested with no active recording");
            return None;
        };

        let samples: Vec<f32> = session.frames.into_iter().flatten().collect();
        let duration = if self.native_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(samples.len() as f64 / f64::from(self.native_rate))
        };

        info!(
            source = session.source.as_str(),
            samples = samples.len(),
            duration_ms = duration.as_millis() as u64,
            speech = session.endpointer.speech_started(),
            "recording session stopped"
        );

        Some(CapturedAudio {
            source: session.source,
            samples,
            sample_rate: self.native_rate,
            started_at: session.started_at,
            duration,
            speech_detected: session.endpointer.speech_started(),
            vad_used: self.has_vad(),
        })
    }

    /// Watchdog path: drop a session active for at least `threshold`.
    pub fn force_clear_if_stuck(&self, now: Instant, threshold: Duration) -> bool {
        let mut inner = self.inner.lock();
        let stuck_for = match inner.session.as_ref() {
            Some(s) => now.saturating_duration_since(s.started_at),
            None => return false,
        };
        if stuck_for < threshold {
            return false;
        }

        let source = inner.session.take().map(|s| s.source);
        inner.reset_vad();
        inner.indicator = false;
        warn!(
            source = source.map(RecordingSource::as_str),
            stuck_secs = stuck_for.as_secs(),
            "force-cleared stuck recording session"
        );
        true
    }

    /// Exit hook for leaving the Listening state: discard whatever session is
    /// left and drop the indicator. Returns `true` if a session was discarded.
    pub fn clear_for_exit(&self) -> bool {
        let mut inner = self.inner.lock();
        let discarded = inner.session.take();
        inner.reset_vad();
        inner.indicator = false;
        if let Some(s) = discarded.as_ref() {
            debug!(
                source = s.source.as_str(),
                "discarded recording session on state exit"
            );
        }
        discarded.is_some()
    }

    /// Clear the indicator if it is showing with no session behind it.
    ///
    /// `capture_adjacent` is whether the state machine currently sits in a
    /// state where the indicator legitimately shows.
    pub fn clear_stale_indicator(&self, capture_adjacent: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.indicator && inner.session.is_none() && !capture_adjacent {
            inner.indicator = false;
            return true;
        }
        false
    }

    pub fn set_indicator(&self, shown: bool) {
        self.inner.lock().indicator = shown;
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    pub fn current_source(&self) -> Option<RecordingSource> {
        self.inner.lock().session.as_ref().map(|s| s.source)
    }

    pub fn has_vad(&self) -> bool {
        self.inner.lock().vad.is_some()
    }

    pub fn snapshot(&self) -> ArbiterSnapshot {
        let inner = self.inner.lock();
        ArbiterSnapshot {
            source: inner.session.as_ref().map(|s| s.source),
            started_at: inner.session.as_ref().map(|s| s.started_at),
            buffered_frames: inner.session.as_ref().map_or(0, |s| s.frames.len()),
            indicator_shown: inner.indicator,
        }
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::EnergyVad;
    use std::sync::{Arc, Barrier};

    fn arbiter() -> Arbiter {
        Arbiter::new(
            EndpointConfig {
                silence_threshold: Duration::from_millis(100),
                max_recording: Duration::from_secs(5),
            },
            Some(Box::new(EnergyVad::new(0.02, 0))),
            48_000,
            16_000,
        )
    }

    fn race(arb: &Arc<Arbiter>, sources: &[RecordingSource]) -> Vec<StartOutcome> {
        let barrier = Arc::new(Barrier::new(sources.len()));
        let now = Instant::now();
        let handles: Vec<_> = sources
            .iter()
            .map(|&source| {
                let arb = Arc::clone(arb);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    arb.start(source, now)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    fn count(outcomes: &[StartOutcome], wanted: StartOutcome) -> usize {
        outcomes.iter().filter(|o| **o == wanted).count()
    }

    #[test]
    fn concurrent_wake_starts_admit_exactly_one() {
        let arb = Arc::new(arbiter());
        let outcomes = race(&arb, &[RecordingSource::WakeWordTriggered; 8]);
        assert_eq!(count(&outcomes, StartOutcome::Started), 1);
        assert_eq!(count(&outcomes, StartOutcome::Rejected), 7);
        assert_eq!(arb.current_source(), Some(RecordingSource::WakeWordTriggered));
    }

    #[test]
    fn concurrent_button_starts_are_idempotent() {
        let arb = Arc::new(arbiter());
        let outcomes = race(&arb, &[RecordingSource::ButtonTriggered; 8]);
        assert_eq!(count(&outcomes, StartOutcome::Started), 1);
        assert_eq!(count(&outcomes, StartOutcome::AlreadyRecording), 7);
    }

    #[test]
    fn mixed_race_never_yields_two_sessions() {
        for _ in 0..20 {
            let arb = Arc::new(arbiter());
            let mut sources = vec![RecordingSource::WakeWordTriggered; 4];
            sources.extend([RecordingSource::ButtonTriggered; 4]);
            let outcomes = race(&arb, &sources);

            // One fresh start, at most one takeover, and a single stop
            // drains the only session that can exist.
            assert_eq!(count(&outcomes, StartOutcome::Started), 1);
            assert!(count(&outcomes, StartOutcome::TookOver) <= 1);
            assert!(arb.stop().is_some());
            assert!(arb.stop().is_none());
        }
    }

    #[test]
    fn button_takes_over_wake_session_and_discards_audio() {
        let arb = arbiter();
        let t0 = Instant::now();
        assert_eq!(arb.start(RecordingSource::WakeWordTriggered, t0), StartOutcome::Started);
        arb.ingest(&[0.5; 960], &[0.5; 320], t0 + Duration::from_millis(20));
        assert_eq!(arb.snapshot().buffered_frames, 1);

        let t1 = t0 + Duration::from_millis(40);
        assert_eq!(arb.start(RecordingSource::ButtonTriggered, t1), StartOutcome::TookOver);
        let snap = arb.snapshot();
        assert_eq!(snap.source, Some(RecordingSource::ButtonTriggered));
        assert_eq!(snap.buffered_frames, 0);
        assert_eq!(snap.started_at, Some(t1));
    }

    #[test]
    fn wake_start_fails_while_button_records() {
        let arb = arbiter();
        let now = Instant::now();
        arb.start(RecordingSource::ButtonTriggered, now);
        assert_eq!(arb.start(RecordingSource::WakeWordTriggered, now), StartOutcome::Rejected);
        assert_eq!(arb.current_source(), Some(RecordingSource::ButtonTriggered));
    }

    #[test]
    fn stop_hands_over_flattened_audio_and_clears_session() {
        let arb = arbiter();
        let t0 = Instant::now();
        arb.start(RecordingSource::ButtonTriggered, t0);
        for i in 1..=50u32 {
            arb.ingest(&[0.3; 960], &[0.3; 320], t0 + Duration::from_millis(20) * i);
        }
        let captured = arb.stop().expect("captured");
        assert_eq!(captured.samples.len(), 50 * 960);
        assert_eq!(captured.source, RecordingSource::ButtonTriggered);
        assert!(captured.speech_detected);
        assert!(captured.vad_used);
        assert_eq!(captured.duration, Duration::from_secs(1));
        assert!(!arb.is_recording());
        assert!(arb.stop().is_none());
    }

    #[test]
    fn silent_capture_is_a_no_speech_outcome() {
        let arb = arbiter();
        let t0 = Instant::now();
        arb.start(RecordingSource::ButtonTriggered, t0);
        for i in 1..=100u32 {
            arb.ingest(&[0.0; 960], &[0.0; 320], t0 + Duration::from_millis(20) * i);
        }
        let captured = arb.stop().expect("captured");
        assert!(!captured.speech_detected);
        assert!(captured.is_no_speech(Duration::from_millis(500)));
    }

    #[test]
    fn wake_session_endpoints_on_silence() {
        let arb = arbiter();
        let t0 = Instant::now();
        arb.start(RecordingSource::WakeWordTriggered, t0);
        let frame = Duration::from_millis(20);
        assert_eq!(arb.ingest(&[0.4; 960], &[0.4; 320], t0 + frame), None);
        let mut reason = None;
        for i in 2..=20u32 {
            reason = arb.ingest(&[0.0; 960], &[0.0; 320], t0 + frame * i);
            if reason.is_some() {
                break;
            }
        }
        assert_eq!(reason, Some(EndpointReason::Silence));
    }

    #[test]
    fn watchdog_clears_only_stuck_sessions() {
        let arb = arbiter();
        let t0 = Instant::now();
        arb.start(RecordingSource::WakeWordTriggered, t0);
        let threshold = Duration::from_secs(60);

        assert!(!arb.force_clear_if_stuck(t0 + Duration::from_secs(59), threshold));
        assert!(arb.is_recording());
        assert!(arb.force_clear_if_stuck(t0 + Duration::from_secs(61), threshold));
        assert!(!arb.is_recording());
        assert!(!arb.snapshot().indicator_shown);
        assert!(!arb.force_clear_if_stuck(t0 + Duration::from_secs(120), threshold));
    }

    #[test]
    fn stale_indicator_is_cleared_outside_capture_states() {
        let arb = arbiter();
        arb.set_indicator(true);
        assert!(!arb.clear_stale_indicator(true));
        assert!(arb.clear_stale_indicator(false));
        assert!(!arb.snapshot().indicator_shown);

        arb.start(RecordingSource::ButtonTriggered, Instant::now());
        assert!(!arb.clear_stale_indicator(false));
    }
}
