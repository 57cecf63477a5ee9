//! # voxbot-core
//!
//! Capture arbitration and interaction engine for a voice/vision robot.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Poller (own thread)
//!                                                  │
//!                                     Decimator 48 kHz → 16 kHz
//!                                                  │
//!                          ┌───────────────────────┴──────────────────┐
//!                   Arbiter::ingest                          WakeWordModel::score
//!                   (VAD + endpoint)                         (mute + cooldown gate)
//!                          │                                          │
//!                   TurnJob channel                        StateMachine + Arbiter::start
//!                          │
//!          Assistant::run_job: ASR → AnswerDispatcher → TTS
//!                          │
//!            broadcast::Sender<StatusEvent> → display
//! ```
//!
//! The audio callback is zero-alloc. Everything else runs on plain threads;
//! the only async piece is the status broadcast channel.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod arbiter;
pub mod audio;
pub mod buffering;
pub mod dispatch;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod state;
pub mod vad;
pub mod wake;

// Convenience re-exports for downstream crates
pub use arbiter::{Arbiter, CapturedAudio, RecordingSource, StartOutcome};
pub use engine::{
    Assistant, AssistantConfig, Collaborators, CommandOutcome, TurnJob, AsrEngine, CameraCommand,
    FeedbackCue, SpeechSynthesizer,
};
pub use error::{GenerationError, TurnError, VoxbotError};
pub use ipc::commands::{Command, StatusReply};
pub use ipc::events::StatusEvent;
pub use state::{InteractionState, StateMachine};
