//! Blocking poller loop.
//!
//! ## Per frame
//!
//! ```text
//! 1. Block on FrameSource::read_frame (overflow is logged, never fatal)
//! 2. Decimate native → target rate
//! 3. If a session is active: Arbiter::ingest → endpoint?
//!      stop(), Listening → Transcribing, TurnJob to the turn worker
//! 4. If WakeListening and not paused: accumulate model windows, score them
//!      cooldown → discard the scores (the model is still fed)
//!      best ≥ threshold → cue, WakeDetected → Listening, Arbiter::start
//! ```
//!
//! The loop never waits on a turn. Finished captures leave over an unbounded
//! `crossbeam-channel`; everything downstream happens on the worker thread.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use super::{frame_samples, FeedbackCue, TurnJob};
use crate::arbiter::{Arbiter, RecordingSource};
use crate::audio::resample::Decimator;
use crate::audio::{FrameSource, ReadOutcome};
use crate::endpoint::EndpointReason;
use crate::error::Result;
use crate::state::{InteractionState, StateMachine};
use crate::wake::{best_score, WakeGate, WakeWordModel};

#[derive(Default)]
pub struct PollerDiagnostics {
    pub frames_in: AtomicUsize,
    pub frames_resampled: AtomicUsize,
    pub samples_dropped: AtomicUsize,
    pub wake_windows: AtomicUsize,
    pub detections: AtomicUsize,
    pub suppressed_by_cooldown: AtomicUsize,
    pub endpoints: AtomicUsize,
}

impl PollerDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.frames_resampled.store(0, Ordering::Relaxed);
        self.samples_dropped.store(0, Ordering::Relaxed);
        self.wake_windows.store(0, Ordering::Relaxed);
        self.detections.store(0, Ordering::Relaxed);
        self.suppressed_by_cooldown.store(0, Ordering::Relaxed);
        self.endpoints.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_resampled: self.frames_resampled.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            wake_windows: self.wake_windows.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            suppressed_by_cooldown: self.suppressed_by_cooldown.load(Ordering::Relaxed),
            endpoints: self.endpoints.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub frames_resampled: usize,
    pub samples_dropped: usize,
    pub wake_windows: usize,
    pub detections: usize,
    pub suppressed_by_cooldown: usize,
    pub endpoints: usize,
}

/// Something a single frame caused.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// A session ended and its audio went to the turn worker.
    Endpoint(EndpointReason),
    /// A wake word started a session (or lost the race to the button).
    WakeDetected { keyword: String, score: f32 },
}

/// All shared handles the poller needs, passed as one struct.
pub struct PollerContext {
    pub arbiter: Arc<Arbiter>,
    pub state: Arc<StateMachine>,
    pub gate: Arc<WakeGate>,
    pub cue: Arc<dyn FeedbackCue>,
    pub jobs: Sender<TurnJob>,
    pub diagnostics: Arc<PollerDiagnostics>,
}

pub struct Poller {
    ctx: PollerContext,
    decimator: Decimator,
    /// `None` when the wake word is disabled.
    model: Option<Box<dyn WakeWordModel>>,
    threshold: f32,
    /// Target-rate samples waiting for a full model window.
    wake_buf: Vec<f32>,
    last_state: InteractionState,
}

impl Poller {
    /// # Errors
    /// Resampler configuration errors (non-integer ratio).
    pub fn new(
        ctx: PollerContext,
        native_rate: u32,
        target_rate: u32,
        model: Option<Box<dyn WakeWordModel>>,
        threshold: f32,
    ) -> Result<Self> {
        let decimator = Decimator::new(native_rate, target_rate, frame_samples(native_rate))?;
        let last_state = ctx.state.current();
        Ok(Self {
            ctx,
            decimator,
            model,
            threshold,
            wake_buf: Vec::new(),
            last_state,
        })
    }

    pub fn diagnostics(&self) -> Arc<PollerDiagnostics> {
        Arc::clone(&self.ctx.diagnostics)
    }

    /// Process one native-rate frame captured at `now`.
    pub fn step(&mut self, frame: &[f32], now: Instant) -> Option<PollEvent> {
        let diag = &self.ctx.diagnostics;
        diag.frames_in.fetch_add(1, Ordering::Relaxed);

        let resampled = self.decimator.process(frame);
        if !resampled.is_empty() {
            diag.frames_resampled.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(reason) = self.ctx.arbiter.ingest(frame, &resampled, now) {
            diag.endpoints.fetch_add(1, Ordering::Relaxed);
            return self.finish_session(reason);
        }

        let state = self.ctx.state.current();
        let entered = state != self.last_state;
        self.last_state = state;
        if state != InteractionState::WakeListening {
            return None;
        }

        let model = self.model.as_mut()?;
        if entered {
            model.reset();
            self.wake_buf.clear();
        }
        if self.ctx.gate.is_paused() {
            return None;
        }

        self.wake_buf.extend_from_slice(&resampled);
        let window_len = model.frame_len().max(1);
        let cooling = self.ctx.gate.in_cooldown(now);
        let mut hit = None;

        while self.wake_buf.len() >= window_len {
            let window: Vec<f32> = self.wake_buf.drain(..window_len).collect();
            let scores = model.score(&window);
            diag.wake_windows.fetch_add(1, Ordering::Relaxed);

            let Some(best) = best_score(&scores).filter(|s| s.score >= self.threshold) else {
                continue;
            };
            if cooling {
                diag.suppressed_by_cooldown.fetch_add(1, Ordering::Relaxed);
                debug!(
                    keyword = best.keyword.as_str(),
                    score = best.score,
                    "detection suppressed by cooldown"
                );
                continue;
            }
            hit = Some(best.clone());
            break;
        }

        let hit = hit?;
        self.on_detection(hit.keyword, hit.score, now)
    }

    fn finish_session(&mut self, reason: EndpointReason) -> Option<PollEvent> {
        let captured = self.ctx.arbiter.stop()?;
        debug!(?reason, "session endpointed");

        if !self
            .ctx
            .state
            .transition_if(&[InteractionState::Listening], InteractionState::Transcribing)
        {
            debug!("endpoint outside Listening, capture dropped");
            return None;
        }
        if self.ctx.jobs.send(TurnJob::Transcribe(captured)).is_err() {
            warn!("turn worker gone, capture dropped");
            let rest = self.ctx.state.rest_state();
            self.ctx
                .state
                .transition_if(&[InteractionState::Transcribing], rest);
        }
        Some(PollEvent::Endpoint(reason))
    }

    fn on_detection(&mut self, keyword: String, score: f32, now: Instant) -> Option<PollEvent> {
        use crate::state::InteractionState::*;

        info!(keyword = keyword.as_str(), score, "wake word detected");
        self.ctx.diagnostics.detections.fetch_add(1, Ordering::Relaxed);
        self.ctx.cue.play();

        if !self.ctx.state.transition_if(&[WakeListening], WakeDetected) {
            debug!("state moved on during detection");
            return None;
        }
        let Some(outcome) = self.ctx.state.start_listening(
            &[WakeDetected],
            RecordingSource::WakeWordTriggered,
            now,
        ) else {
            debug!("state moved on during detection");
            return None;
        };
        if !outcome.is_recording() {
            debug!(?outcome, "button owns the session");
        }
        Some(PollEvent::WakeDetected { keyword, score })
    }

    /// Read and process frames until `running` clears or the source closes.
    pub fn run(mut self, source: &mut dyn FrameSource, running: &AtomicBool) {
        let native_rate = source.sample_rate();
        let mut frame = vec![0.0f32; frame_samples(native_rate)];
        self.ctx.diagnostics.reset();
        info!(
            native_rate,
            frame_len = frame.len(),
            wake_word = self.model.is_some(),
            threshold = self.threshold,
            "poller started"
        );

        while running.load(Ordering::Relaxed) {
            match source.read_frame(&mut frame) {
                ReadOutcome::Frame => {}
                ReadOutcome::FrameAfterOverflow { dropped } => {
                    self.ctx
                        .diagnostics
                        .samples_dropped
                        .fetch_add(dropped, Ordering::Relaxed);
                    warn!(dropped, "audio ring overflow, samples dropped");
                }
                ReadOutcome::Closed => {
                    info!("audio source closed");
                    break;
                }
            }
            self.step(&frame, Instant::now());
        }

        let d = self.ctx.diagnostics.snapshot();
        info!(
            frames_in = d.frames_in,
            frames_resampled = d.frames_resampled,
            samples_dropped = d.samples_dropped,
            wake_windows = d.wake_windows,
            detections = d.detections,
            suppressed_by_cooldown = d.suppressed_by_cooldown,
            endpoints = d.endpoints,
            "poller stopped"
        );
    }
}
