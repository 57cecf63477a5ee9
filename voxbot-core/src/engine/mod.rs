//! The interaction engine.
//!
//! ## Threads
//!
//! ```text
//! Poller thread ── frames ─► Arbiter ── endpoint ─► TurnJob ─► turn worker ─┐
//!       │                                                                   │
//!       └─ wake word ─► StateMachine ◄── Command handlers (one per client)  │
//!                            ▲                                              │
//!                            └────────── Assistant::run_job ◄───────────────┘
//! ```
//!
//! [`Assistant`] owns everything a turn needs: the arbiter, the state machine,
//! the wake gate, the answer dispatcher and the external collaborators. It
//! handles socket commands and drives turns; [`poller::Poller`] and
//! [`watchdog::Watchdog`] run beside it on their own threads.
//!
//! A turn only moves the state machine forward from the stage it last set.
//! When something else moved the machine first (RESET, a watchdog clear) the
//! turn ends with [`TurnError::Superseded`] and leaves the state alone.

pub mod poller;
pub mod watchdog;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::arbiter::{Arbiter, CapturedAudio, RecordingSource};
use crate::audio::resample::Decimator;
use crate::dispatch::llm::VisionModel;
use crate::dispatch::{AnswerDispatcher, DispatchOutcome};
use crate::error::TurnError;
use crate::ipc::commands::{Command, StatusReply, ACK};
use crate::state::{InteractionState, StateMachine};
use crate::wake::WakeGate;

/// Length of one poller frame.
pub const FRAME_MS: u32 = 20;

/// Samples per [`FRAME_MS`] frame at `sample_rate`.
pub fn frame_samples(sample_rate: u32) -> usize {
    (sample_rate / 1000 * FRAME_MS) as usize
}

/// Speech recognizer. Receives mono samples at the target rate.
pub trait AsrEngine: Send + Sync {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, TurnError>;
}

/// Speech output. Blocks until playback has finished.
pub trait SpeechSynthesizer: Send + Sync {
    fn speak(&self, text: &str) -> Result<(), TurnError>;
}

/// Still camera. Returns the path of the captured image.
pub trait CameraCommand: Send + Sync {
    fn capture(&self) -> Result<PathBuf, TurnError>;
}

/// Short sound acknowledging a wake word.
pub trait FeedbackCue: Send + Sync {
    fn play(&self);
}

/// Cue that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCue;

impl FeedbackCue for SilentCue {
    fn play(&self) {
        debug!("wake cue");
    }
}

/// Work handed to the turn driver.
#[derive(Debug)]
pub enum TurnJob {
    /// A finished capture; the machine is in Transcribing.
    Transcribe(CapturedAudio),
    /// A camera request; the machine is in Camera.
    Camera,
}

impl TurnJob {
    /// State the machine is in when the job is handed over.
    pub fn stage(&self) -> InteractionState {
        match self {
            Self::Transcribe(_) => InteractionState::Transcribing,
            Self::Camera => InteractionState::Camera,
        }
    }
}

/// Reply to a socket command plus any turn it started.
#[derive(Debug)]
pub struct CommandOutcome {
    pub reply: String,
    /// Runs after the reply has been written.
    pub follow_up: Option<TurnJob>,
}

impl CommandOutcome {
    fn ack() -> Self {
        Self {
            reply: ACK.to_owned(),
            follow_up: None,
        }
    }

    fn ack_then(job: TurnJob) -> Self {
        Self {
            reply: ACK.to_owned(),
            follow_up: Some(job),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Captures shorter than this are treated as no speech.
    pub min_recording: Duration,
    /// Wake-word quiet period after speech output or a no-speech outcome.
    pub tts_cooldown: Duration,
    pub camera_enabled: bool,
    /// Rate the recognizer expects.
    pub target_rate: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            min_recording: Duration::from_millis(500),
            tts_cooldown: Duration::from_secs(2),
            camera_enabled: true,
            target_rate: 16_000,
        }
    }
}

/// External services a turn calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub asr: Arc<dyn AsrEngine>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub camera: Arc<dyn CameraCommand>,
    pub vision: Arc<dyn VisionModel>,
    pub cue: Arc<dyn FeedbackCue>,
}

/// Tracks the stage a turn last set and advances only from there.
struct TurnCursor<'a> {
    state: &'a StateMachine,
    stage: InteractionState,
}

impl<'a> TurnCursor<'a> {
    fn new(state: &'a StateMachine, stage: InteractionState) -> Self {
        Self { state, stage }
    }

    fn advance(&mut self, to: InteractionState) -> Result<(), TurnError> {
        self.advance_with_text(to, to.caption())
    }

    fn advance_with_text(&mut self, to: InteractionState, text: &str) -> Result<(), TurnError> {
        if self.state.transition_if_with_text(&[self.stage], to, text) {
            self.stage = to;
            Ok(())
        } else {
            Err(TurnError::Superseded(self.state.current().to_string()))
        }
    }

    /// Back to rest, unless another actor already moved the machine.
    fn finish(self) {
        let rest = self.state.rest_state();
        if self.stage != rest {
            self.state.transition_if_with_text(&[self.stage], rest, "");
        }
    }
}

pub struct Assistant {
    config: AssistantConfig,
    arbiter: Arc<Arbiter>,
    state: Arc<StateMachine>,
    gate: Arc<WakeGate>,
    dispatcher: AnswerDispatcher,
    collaborators: Collaborators,
}

impl Assistant {
    pub fn new(
        config: AssistantConfig,
        arbiter: Arc<Arbiter>,
        state: Arc<StateMachine>,
        gate: Arc<WakeGate>,
        dispatcher: AnswerDispatcher,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            arbiter,
            state,
            gate,
            dispatcher,
            collaborators,
        }
    }

    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }

    pub fn state(&self) -> &Arc<StateMachine> {
        &self.state
    }

    pub fn gate(&self) -> &Arc<WakeGate> {
        &self.gate
    }

    pub fn cue(&self) -> Arc<dyn FeedbackCue> {
        Arc::clone(&self.collaborators.cue)
    }

    /// Apply one socket command. Never fails: a command whose precondition
    /// does not hold is acknowledged and ignored.
    pub fn handle_command(&self, command: &Command, now: Instant) -> CommandOutcome {
        use crate::state::InteractionState::*;

        debug!(command = command.as_str(), "command received");
        match command {
            Command::StartRecording => {
                // In Listening a wake-word session may be running; the button takes over.
                let started = self.state.start_listening(
                    &[Idle, WakeListening, WakeDetected, Listening],
                    RecordingSource::ButtonTriggered,
                    now,
                );
                if started.is_none() {
                    info!(state = self.state.current().as_str(), "START_RECORDING ignored");
                }
                CommandOutcome::ack()
            }

            Command::StopRecording => {
                if self.state.current() != Listening {
                    info!(state = self.state.current().as_str(), "STOP_RECORDING ignored");
                    return CommandOutcome::ack();
                }
                let Some(captured) = self.arbiter.stop() else {
                    return CommandOutcome::ack();
                };
                if !self.state.transition_if(&[Listening], Transcribing) {
                    debug!("state moved on before stop completed, capture dropped");
                    return CommandOutcome::ack();
                }
                CommandOutcome::ack_then(TurnJob::Transcribe(captured))
            }

            Command::CameraCapture => {
                if !self.config.camera_enabled {
                    warn!("CAMERA_CAPTURE ignored, camera disabled");
                    return CommandOutcome::ack();
                }
                if self.state.transition_if(&[Idle, WakeListening], Camera) {
                    CommandOutcome::ack_then(TurnJob::Camera)
                } else {
                    info!(state = self.state.current().as_str(), "CAMERA_CAPTURE ignored");
                    CommandOutcome::ack()
                }
            }

            Command::Status => CommandOutcome {
                reply: self.status_json(),
                follow_up: None,
            },

            Command::Reset => {
                info!("reset requested");
                self.dispatcher.clear_history();
                self.state.return_to_rest();
                CommandOutcome::ack()
            }

            Command::Unknown(raw) => {
                debug!(command = raw.as_str(), "unknown command ignored");
                CommandOutcome::ack()
            }
        }
    }

    pub fn status(&self) -> StatusReply {
        StatusReply {
            state: self.state.current(),
            conversation_length: self.dispatcher.history_len(),
            wake_word_enabled: self.state.wake_word_enabled(),
            recording_source: self.arbiter.current_source(),
        }
    }

    fn status_json(&self) -> String {
        serde_json::to_string(&self.status()).unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode status reply");
            ACK.to_owned()
        })
    }

    /// Drive one turn to completion. The only place turn failures end up.
    pub fn run_job(&self, job: TurnJob) {
        let mut turn = TurnCursor::new(&self.state, job.stage());
        let result = match job {
            TurnJob::Transcribe(audio) => self.transcribe_and_answer(&mut turn, audio),
            TurnJob::Camera => self.camera_flow(&mut turn),
        };

        match result {
            Ok(()) => {}
            Err(TurnError::Superseded(state)) => {
                debug!(state = state.as_str(), "turn superseded");
                return;
            }
            Err(e @ TurnError::Acquisition(_)) => info!(reason = %e, "no speech"),
            Err(e) => warn!(stage = turn.stage.as_str(), error = %e, "turn failed"),
        }
        turn.finish();
    }

    fn transcribe_and_answer(
        &self,
        turn: &mut TurnCursor<'_>,
        audio: CapturedAudio,
    ) -> Result<(), TurnError> {
        if audio.is_no_speech(self.config.min_recording) {
            self.gate.start_cooldown(Instant::now(), self.config.tts_cooldown);
            return Err(TurnError::Acquisition(format!(
                "{} ms captured, speech detected: {}",
                audio.duration.as_millis(),
                audio.speech_detected
            )));
        }

        let samples = self.to_target_rate(&audio.samples, audio.sample_rate)?;
        let started = Instant::now();
        let transcript = self
            .collaborators
            .asr
            .transcribe(&samples, self.config.target_rate)?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            self.gate.start_cooldown(Instant::now(), self.config.tts_cooldown);
            return Err(TurnError::Acquisition("empty transcript".into()));
        }
        info!(
            transcript,
            asr_ms = started.elapsed().as_millis() as u64,
            "transcribed"
        );
        self.state.update_text(transcript);

        turn.advance(InteractionState::Answering)?;
        match self.dispatcher.dispatch(transcript, Instant::now())? {
            DispatchOutcome::Answer(text) => self.speak(turn, &text),
            DispatchOutcome::Camera if !self.config.camera_enabled => {
                Err(TurnError::Capture("camera disabled".into()))
            }
            DispatchOutcome::Camera => {
                turn.advance(InteractionState::Camera)?;
                self.camera_flow(turn)
            }
        }
    }

    fn camera_flow(&self, turn: &mut TurnCursor<'_>) -> Result<(), TurnError> {
        let image = self.collaborators.camera.capture()?;
        info!(path = %image.display(), "image captured");
        self.state.update_text("Analyzing image...");

        let description = self.collaborators.vision.describe(&image)?;
        if let Err(e) = std::fs::remove_file(&image) {
            debug!(path = %image.display(), error = %e, "could not remove image");
        }
        self.speak(turn, &description)
    }

    /// Speak `text` with wake-word detection paused, then start the cooldown.
    fn speak(&self, turn: &mut TurnCursor<'_>, text: &str) -> Result<(), TurnError> {
        turn.advance_with_text(InteractionState::Speaking, text)?;
        self.gate.pause();
        let result = self.collaborators.tts.speak(text);
        self.gate
            .resume_with_cooldown(Instant::now(), self.config.tts_cooldown);
        result
    }

    fn to_target_rate(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>, TurnError> {
        let mut decimator = Decimator::new(
            sample_rate,
            self.config.target_rate,
            frame_samples(sample_rate),
        )
        .map_err(|e| TurnError::Recognition(e.to_string()))?;
        Ok(decimator.process_all(samples))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted collaborators shared by the engine tests.

    use super::*;
    use crate::dispatch::llm::{ChatMessage, LlmClient, LlmReply};
    use crate::dispatch::tools::{Tool, ToolExecutor};
    use crate::dispatch::DispatchConfig;
    use crate::endpoint::EndpointConfig;
    use crate::error::GenerationError;
    use crate::vad::EnergyVad;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::path::Path;
    use tokio::sync::broadcast;

    #[derive(Default)]
    pub struct Calls {
        pub asr: Mutex<Vec<usize>>,
        pub spoken: Mutex<Vec<String>>,
        pub captures: Mutex<usize>,
    }

    pub struct ScriptedAsr {
        pub calls: Arc<Calls>,
        pub reply: Result<String, TurnError>,
    }

    impl AsrEngine for ScriptedAsr {
        fn transcribe(&self, samples: &[f32], _rate: u32) -> Result<String, TurnError> {
            self.calls.asr.lock().push(samples.len());
            self.reply.clone()
        }
    }

    pub struct RecordingTts(pub Arc<Calls>);

    impl SpeechSynthesizer for RecordingTts {
        fn speak(&self, text: &str) -> Result<(), TurnError> {
            self.0.spoken.lock().push(text.to_owned());
            Ok(())
        }
    }

    pub struct FakeCamera(pub Arc<Calls>);

    impl CameraCommand for FakeCamera {
        fn capture(&self) -> Result<PathBuf, TurnError> {
            *self.0.captures.lock() += 1;
            Ok(PathBuf::from("/nonexistent/voxbot-test.jpg"))
        }
    }

    pub struct FakeVision;

    impl VisionModel for FakeVision {
        fn describe(&self, _image: &Path) -> Result<String, GenerationError> {
            Ok("A cat on a sofa.".into())
        }
    }

    pub struct FixedLlm(pub &'static str);

    impl LlmClient for FixedLlm {
        fn name(&self) -> &str {
            "fixed"
        }

        fn chat(&self, _: &[ChatMessage], _: Option<&Value>) -> Result<LlmReply, GenerationError> {
            Ok(LlmReply::Text(self.0.into()))
        }
    }

    pub struct NoTools;

    impl ToolExecutor for NoTools {
        fn execute(&self, tool: &Tool) -> String {
            format!("{} done.", tool.name())
        }
    }

    pub struct Harness {
        pub assistant: Assistant,
        pub calls: Arc<Calls>,
        pub status_rx: broadcast::Receiver<crate::ipc::events::StatusEvent>,
    }

    pub fn harness(wake: bool, asr_reply: Result<String, TurnError>) -> Harness {
        let calls = Arc::new(Calls::default());
        let arbiter = Arc::new(Arbiter::new(
            EndpointConfig::default(),
            Some(Box::new(EnergyVad::default())),
            48_000,
            16_000,
        ));
        let (tx, status_rx) = broadcast::channel(64);
        let state = Arc::new(StateMachine::new(wake, Arc::clone(&arbiter), tx));
        let dispatcher = AnswerDispatcher::new(
            DispatchConfig {
                system_prompt: "Be brief.".into(),
                max_history_messages: 10,
                history_timeout: Duration::from_secs(300),
            },
            Box::new(FixedLlm("It is sunny.")),
            Arc::new(NoTools),
        )
        .unwrap();
        let collaborators = Collaborators {
            asr: Arc::new(ScriptedAsr {
                calls: Arc::clone(&calls),
                reply: asr_reply,
            }),
            tts: Arc::new(RecordingTts(Arc::clone(&calls))),
            camera: Arc::new(FakeCamera(Arc::clone(&calls))),
            vision: Arc::new(FakeVision),
            cue: Arc::new(SilentCue),
        };
        let assistant = Assistant::new(
            AssistantConfig::default(),
            arbiter,
            state,
            Arc::new(WakeGate::new()),
            dispatcher,
            collaborators,
        );
        Harness {
            assistant,
            calls,
            status_rx,
        }
    }

    /// Feed `n` frames of constant `level` at 20 ms spacing from `t0`.
    pub fn feed(arbiter: &Arbiter, level: f32, n: u32, t0: Instant) {
        for i in 1..=n {
            arbiter.ingest(&[level; 960], &[level; 320], t0 + Duration::from_millis(20) * i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::state::InteractionState::*;

    #[test]
    fn button_turn_runs_end_to_end() {
        let h = harness(true, Ok("what is the weather".into()));
        let a = &h.assistant;
        let t0 = Instant::now();

        assert!(a.handle_command(&Command::StartRecording, t0).follow_up.is_none());
        assert_eq!(a.state().current(), Listening);
        feed(a.arbiter(), 0.3, 50, t0);

        let out = a.handle_command(&Command::StopRecording, t0 + Duration::from_secs(1));
        assert_eq!(out.reply, "OK");
        assert_eq!(a.state().current(), Transcribing);
        a.run_job(out.follow_up.expect("job"));

        assert_eq!(h.calls.asr.lock().len(), 1);
        assert_eq!(*h.calls.spoken.lock(), vec!["It is sunny.".to_owned()]);
        assert_eq!(a.state().current(), WakeListening);
        assert!(!a.gate().is_paused());
        assert!(a.gate().in_cooldown(Instant::now()));
        assert_eq!(a.status().conversation_length, 2);
    }

    #[test]
    fn start_is_refused_mid_turn() {
        let h = harness(false, Ok("hi".into()));
        let a = &h.assistant;
        let now = Instant::now();
        a.handle_command(&Command::StartRecording, now);
        feed(a.arbiter(), 0.3, 50, now);
        let job = a.handle_command(&Command::StopRecording, now).follow_up;
        assert!(job.is_some());

        a.handle_command(&Command::StartRecording, now);
        assert_eq!(a.state().current(), Transcribing);
        assert!(!a.arbiter().is_recording());
    }

    #[test]
    fn button_takes_over_wake_session_in_listening() {
        let h = harness(true, Ok("hi".into()));
        let a = &h.assistant;
        let now = Instant::now();
        assert!(a.state().transition(WakeDetected));
        assert!(a.state().transition(Listening));
        a.arbiter().start(RecordingSource::WakeWordTriggered, now);

        a.handle_command(&Command::StartRecording, now);
        assert_eq!(a.arbiter().current_source(), Some(RecordingSource::ButtonTriggered));
        assert_eq!(a.state().current(), Listening);
    }

    #[test]
    fn asr_failure_returns_to_rest() {
        let h = harness(false, Err(TurnError::Recognition("engine crashed".into())));
        let a = &h.assistant;
        let now = Instant::now();
        a.handle_command(&Command::StartRecording, now);
        feed(a.arbiter(), 0.3, 50, now);
        let job = a.handle_command(&Command::StopRecording, now).follow_up.expect("job");
        a.run_job(job);

        assert_eq!(a.state().current(), Idle);
        assert!(h.calls.spoken.lock().is_empty());
    }

    #[test]
    fn empty_transcript_is_no_speech() {
        let h = harness(true, Ok("   ".into()));
        let a = &h.assistant;
        let now = Instant::now();
        a.handle_command(&Command::StartRecording, now);
        feed(a.arbiter(), 0.3, 50, now);
        let job = a.handle_command(&Command::StopRecording, now).follow_up.expect("job");
        a.run_job(job);

        assert_eq!(a.state().current(), WakeListening);
        assert!(a.gate().in_cooldown(Instant::now()));
        assert_eq!(a.status().conversation_length, 0);
    }

    #[test]
    fn reset_mid_turn_supersedes_it() {
        let h = harness(true, Ok("tell me something".into()));
        let a = &h.assistant;
        let now = Instant::now();
        a.handle_command(&Command::StartRecording, now);
        feed(a.arbiter(), 0.3, 50, now);
        let job = a.handle_command(&Command::StopRecording, now).follow_up.expect("job");

        a.handle_command(&Command::Reset, now);
        assert_eq!(a.state().current(), WakeListening);
        a.run_job(job);

        // Recognition ran, but the turn could not move past Transcribing.
        assert_eq!(h.calls.asr.lock().len(), 1);
        assert!(h.calls.spoken.lock().is_empty());
        assert_eq!(a.state().current(), WakeListening);
    }

    #[test]
    fn camera_capture_describes_and_speaks() {
        let mut h = harness(false, Ok(String::new()));
        let a = &h.assistant;
        let out = a.handle_command(&Command::CameraCapture, Instant::now());
        assert_eq!(a.state().current(), Camera);
        a.run_job(out.follow_up.expect("job"));

        assert_eq!(*h.calls.captures.lock(), 1);
        assert_eq!(*h.calls.spoken.lock(), vec!["A cat on a sofa.".to_owned()]);
        assert_eq!(a.state().current(), Idle);

        let states: Vec<_> = std::iter::from_fn(|| h.status_rx.try_recv().ok())
            .map(|e| e.state)
            .collect();
        assert_eq!(states, vec![Camera, Camera, Speaking, Idle]);
    }

    #[test]
    fn status_reports_state_and_source() {
        let h = harness(true, Ok(String::new()));
        let a = &h.assistant;
        a.handle_command(&Command::StartRecording, Instant::now());
        let reply = a.handle_command(&Command::Status, Instant::now()).reply;
        let json: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(json["state"], "listening");
        assert_eq!(json["wake_word_enabled"], true);
        assert_eq!(json["recording_source"], "button_triggered");
        assert_eq!(json["conversation_length"], 0);
    }

    #[test]
    fn unknown_and_failed_preconditions_are_acknowledged() {
        let h = harness(false, Ok(String::new()));
        let a = &h.assistant;
        let now = Instant::now();
        let out = a.handle_command(&Command::parse("DANCE"), now);
        assert_eq!(out.reply, "OK");
        let out = a.handle_command(&Command::StopRecording, now);
        assert_eq!(out.reply, "OK");
        assert!(out.follow_up.is_none());
        assert_eq!(a.state().current(), Idle);
    }
}
