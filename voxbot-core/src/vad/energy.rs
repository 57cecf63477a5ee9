//! Energy-based VAD using RMS threshold + hangover counter.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the incoming chunk.
//! 2. If RMS ≥ `threshold`, emit `Speech` and re-arm the hangover counter.
//! 3. If RMS < `threshold` and the hangover counter is non-zero, emit
//!    `Speech` and decrement it (keeps syllable endings inside the utterance).
//! 4. Otherwise emit `Silence`.
//!
//! ## Aggressiveness
//!
//! Mirrors the 0–3 scale of WebRTC-style detectors: higher values need more
//! energy to call a frame speech and hold speech for fewer frames.

use super::{VadDecision, VoiceActivityDetector};
use crate::buffering::chunk::{compute_rms, AudioChunk};

/// RMS threshold per aggressiveness level.
const THRESHOLDS: [f32; 4] = [0.006, 0.010, 0.016, 0.025];
/// Hangover frames (20 ms each) per aggressiveness level.
const HANGOVERS: [u32; 4] = [12, 10, 8, 5];

/// A simple energy-based voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS amplitude threshold. Frames above this are considered speech.
    threshold: f32,
    /// Silent frames still reported as `Speech` after real speech ends.
    hangover_frames: u32,
    hangover_counter: u32,
}

impl EnergyVad {
    pub fn new(threshold: f32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            hangover_frames,
            hangover_counter: 0,
        }
    }

    /// Build a detector for aggressiveness `0..=3`; larger values are clamped.
    pub fn with_aggressiveness(level: u8) -> Self {
        let idx = usize::from(level.min(3));
        Self::new(THRESHOLDS[idx], HANGOVERS[idx])
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::with_aggressiveness(2)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision {
        if compute_rms(&chunk.samples) >= self.threshold {
            self.hangover_counter = self.hangover_frames;
            VadDecision::Speech
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {
        self.hangover_counter = 0;
    }
}
