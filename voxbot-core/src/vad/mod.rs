//! Frame-level speech/silence labelling for recording sessions.
//!
//! The arbiter feeds every target-rate frame of an active session to one
//! detector and hands the label to the session's endpoint detector. Without a
//! detector no label exists and sessions end on the hard cap or on release.

pub mod energy;

pub use energy::EnergyVad;

use crate::buffering::chunk::AudioChunk;

/// Label for one session frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    /// Below threshold and outside the hangover window.
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// A speech/silence classifier, configured for the target rate.
///
/// One instance lives inside the arbiter and is reset at every session start,
/// so hangover never leaks from one recording into the next.
pub trait VoiceActivityDetector: Send + 'static {
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision;

    fn reset(&mut self);
}
