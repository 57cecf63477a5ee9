//! Integer-factor decimation using a rubato `FftFixedInOut` resampler.
//!
//! ## Design
//!
//! The microphone delivers 48 kHz mono; VAD, the wake-word classifier and the
//! recognizer all want 16 kHz. `Decimator` bridges that gap on the poller
//! thread. rubato's FFT resampler band-limits before it drops samples, so
//! the output is anti-aliased and exactly `input / factor` samples per block.
//!
//! When native rate == target rate, `Decimator` is a passthrough and no
//! rubato session is created at all.
//!
//! ## Usage
//!
//! ```ignore
//! let mut d = Decimator::new(48_000, 16_000, 960)?;
//! let out = d.process(&raw_frame); // 320 samples at 16 kHz
//! ```

use rubato::{FftFixedInOut, Resampler};
use tracing::{error, info};

use crate::error::{Result, VoxbotError};

/// Returns the integer decimation factor between two rates.
///
/// # Errors
/// `VoxbotError::UnsupportedRatio` when `native` is not a whole multiple of `target`.
pub fn decimation_factor(native: u32, target: u32) -> Result<usize> {
    if target == 0 || native == 0 || native < target || native % target != 0 {
        return Err(VoxbotError::UnsupportedRatio {
            from: native,
            to: target,
        });
    }
    Ok((native / target) as usize)
}

/// Decimates mono f32 audio by a fixed integer factor.
pub struct Decimator {
    /// `None` when native rate == target rate (passthrough mode).
    resampler: Option<FftFixedInOut<f32>>,
    factor: usize,
    /// Holds partial input between calls.
    input_buf: Vec<f32>,
    /// Input samples rubato consumes per call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    native_rate: u32,
    target_rate: u32,
}

impl Decimator {
    /// Create a new decimator.
    ///
    /// `chunk_size` is the preferred input block (native samples); rubato may
    /// round it to the nearest block its FFT sizes allow.
    ///
    /// # Errors
    /// `UnsupportedRatio` for non-integer ratios, `Resampler` if rubato fails.
    pub fn new(native_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        let factor = decimation_factor(native_rate, target_rate)?;

        if factor == 1 {
            return Ok(Self {
                resampler: None,
                factor,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                native_rate,
                target_rate,
            });
        }

        let resampler = FftFixedInOut::<f32>::new(
            native_rate as usize,
            target_rate as usize,
            chunk_size.max(factor),
            1, // mono
        )
        .map_err(|e| VoxbotError::Resampler(format!("init: {e}")))?;

        let chunk_size = resampler.input_frames_next();
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        info!(
            native_rate,
            target_rate,
            factor,
            chunk_size,
            "decimation enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            factor,
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
            native_rate,
            target_rate,
        })
    }

    /// Process incoming samples, returning decimated output (may be empty).
    ///
    /// Samples accumulate internally until a full block is available; any
    /// remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::with_capacity(self.input_buf.len() / self.factor);

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("decimator process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Decimate a complete buffer, flushing the trailing partial block.
    ///
    /// Output length is `samples.len() / factor`. Used for the captured
    /// session buffer before it is handed to the recognizer.
    pub fn process_all(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.resampler.is_none() {
            return samples.to_vec();
        }

        let mut out = self.process(samples);
        let tail = self.input_buf.len();
        if tail > 0 {
            let pad = self.chunk_size - tail;
            let flushed = self.process(&vec![0.0; pad]);
            out.extend(flushed.into_iter().take(tail / self.factor));
        }
        out
    }

    /// Drop any buffered partial block.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(ref mut resampler) = self.resampler {
            resampler.reset();
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Native samples consumed per rubato call.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Returns `true` when native rate == target rate.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
