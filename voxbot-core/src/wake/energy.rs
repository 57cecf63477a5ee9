//! Keyword-free fallback classifier: scores sudden energy spikes.
//!
//! Useful on a bench without a trained model, or to exercise the wake path
//! end to end. A loud onset after quiet background scores high; steady
//! sound does not, because the background average catches up with it.

use super::{KeywordScore, WakeWordModel};
use crate::buffering::chunk::compute_rms;

/// 80 ms at 16 kHz.
pub const DEFAULT_FRAME_LEN: usize = 1280;

/// Background level below which spikes are not trusted.
const MIN_BACKGROUND: f32 = 0.003;
/// Weight of history in the background moving average.
const EMA_DECAY: f32 = 0.9;

pub struct EnergySpikeModel {
    keyword: String,
    frame_len: usize,
    /// Onset must exceed background by this factor to score at all.
    spike_ratio: f32,
    background: f32,
}

impl EnergySpikeModel {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            frame_len: DEFAULT_FRAME_LEN,
            spike_ratio: 3.0,
            background: 0.0,
        }
    }

    pub fn with_spike_ratio(mut self, ratio: f32) -> Self {
        self.spike_ratio = ratio.max(1.0);
        self
    }
}

impl WakeWordModel for EnergySpikeModel {
    fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn score(&mut self, frame: &[f32]) -> Vec<KeywordScore> {
        let rms = compute_rms(frame);
        let spiking = self.background > MIN_BACKGROUND && rms > self.background * self.spike_ratio;
        let score = if spiking {
            let ratio = rms / self.background;
            ((ratio - self.spike_ratio) / self.spike_ratio).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.background = self.background * EMA_DECAY + rms * (1.0 - EMA_DECAY);

        vec![KeywordScore {
            keyword: self.keyword.clone(),
            score,
        }]
    }

    fn reset(&mut self) {
        self.background = 0.0;
    }
}
