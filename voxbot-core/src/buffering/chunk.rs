//! Typed audio chunk passed from capture to the VAD, wake-word and recognition stages.

/// A contiguous block of mono PCM samples at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 48000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square level of the chunk.
    pub fn rms(&self) -> f32 {
        compute_rms(&self.samples)
    }
}

pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn duration_of_one_second_at_16k() {
        let chunk = AudioChunk::new(vec![0.0; 16_000], 16_000);
        assert_abs_diff_eq!(chunk.duration_secs(), 1.0);
        assert_eq!(AudioChunk::new(vec![0.0; 4], 0).duration_secs(), 0.0);
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert_abs_diff_eq!(compute_rms(&samples), 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(AudioChunk::new(samples, 16_000).rms(), 0.5, epsilon = 1e-5);
        assert_eq!(compute_rms(&[]), 0.0);
    }
}
