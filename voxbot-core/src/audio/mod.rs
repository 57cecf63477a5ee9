//! Audio capture via cpal, exposed to the poller as a blocking frame source.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread. It **must not**
//! allocate per call, block on a mutex, or perform I/O. It downmixes into a
//! scratch buffer sized once and writes into an SPSC ring producer whose
//! `push_slice` is lock-free. Overflows are counted, never logged from the
//! callback; the reader reports them.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. `AudioCapture` therefore must
//! be created and dropped on the same thread, which in practice is the
//! poller thread that also owns the [`RingFrameSource`].

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::buffering::{AudioConsumer, Consumer};
#[cfg(feature = "audio-cpal")]
use crate::buffering::{create_audio_ring, AudioProducer, Producer};
use crate::error::{Result, VoxbotError};

/// Sleep between ring polls while a frame is still incomplete.
const EMPTY_POLL_SLEEP: Duration = Duration::from_millis(2);

/// What a blocking frame read produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The frame buffer was filled.
    Frame,
    /// The frame buffer was filled, but `dropped` samples were lost upstream
    /// since the previous read. Callers log and carry on.
    FrameAfterOverflow { dropped: usize },
    /// The source is shutting down; no frame was produced.
    Closed,
}

/// A continuous source of fixed-size mono PCM frames at a native rate.
pub trait FrameSource: Send {
    /// Native sample rate (Hz) of the frames.
    fn sample_rate(&self) -> u32;

    /// Block until `frame` is completely filled or the source closes.
    fn read_frame(&mut self, frame: &mut [f32]) -> ReadOutcome;
}

/// Reads fixed-size frames out of the capture ring buffer.
pub struct RingFrameSource {
    consumer: AudioConsumer,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    overflow: Arc<AtomicUsize>,
    reported_overflow: usize,
    filled: usize,
}

impl RingFrameSource {
    pub fn new(
        consumer: AudioConsumer,
        sample_rate: u32,
        running: Arc<AtomicBool>,
        overflow: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            consumer,
            sample_rate,
            running,
            overflow,
            reported_overflow: 0,
            filled: 0,
        }
    }
}

impl FrameSource for RingFrameSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&mut self, frame: &mut [f32]) -> ReadOutcome {
        loop {
            if !self.running.load(Ordering::Relaxed) {
                return ReadOutcome::Closed;
            }

            self.filled += self.consumer.pop_slice(&mut frame[self.filled..]);
            if self.filled < frame.len() {
                std::thread::sleep(EMPTY_POLL_SLEEP);
                continue;
            }
            self.filled = 0;

            let total = self.overflow.load(Ordering::Relaxed);
            if total != self.reported_overflow {
                let dropped = total.wrapping_sub(self.reported_overflow);
                self.reported_overflow = total;
                return ReadOutcome::FrameAfterOverflow { dropped };
            }
            return ReadOutcome::Frame;
        }
    }
}

/// Handle to an active audio capture stream.
///
/// **Not `Send`**: create and drop it on the poller thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open the preferred input device (substring match on its name),
    /// falling back to the default device and then to the first one listed.
    /// Requests `requested_rate` and accepts the device default otherwise.
    ///
    /// Returns the capture handle plus the frame source reading from it.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` when no microphone exists, `AudioDevice` /
    /// `AudioStream` when cpal fails.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        preferred_device: Option<&str>,
        requested_rate: u32,
        running: Arc<AtomicBool>,
    ) -> Result<(Self, RingFrameSource)> {
        let host = cpal::default_host();

        let mut selected = None;
        if let Some(wanted) = preferred_device {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected =
                        devices.find(|d| d.name().map(|n| n.contains(wanted)).unwrap_or(false));
                    if selected.is_none() {
                        warn!(wanted, "preferred input device not found, falling back");
                    }
                }
                Err(e) => warn!("failed to list input devices: {e}"),
            }
        }

        let device = match selected.or_else(|| host.default_input_device()) {
            Some(d) => d,
            None => host
                .input_devices()
                .map_err(|e| VoxbotError::AudioDevice(e.to_string()))?
                .next()
                .ok_or(VoxbotError::NoDefaultInputDevice)?,
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| VoxbotError::AudioDevice(e.to_string()))?;
        let channels = supported.channels();
        let rate_supported = device
            .supported_input_configs()
            .map(|mut configs| {
                configs.any(|c| {
                    c.min_sample_rate().0 <= requested_rate
                        && c.max_sample_rate().0 >= requested_rate
                })
            })
            .unwrap_or(false);
        let sample_rate = if rate_supported {
            requested_rate
        } else {
            warn!(
                requested_rate,
                default_rate = supported.sample_rate().0,
                "requested capture rate unsupported, using device default"
            );
            supported.sample_rate().0
        };

        info!(sample_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (producer, consumer) = create_audio_ring();
        let overflow = Arc::new(AtomicUsize::new(0));

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                build_mono_stream::<f32>(&device, &config, producer, &running, &overflow)
            }
            SampleFormat::I16 => {
                build_mono_stream::<i16>(&device, &config, producer, &running, &overflow)
            }
            SampleFormat::U8 => {
                build_mono_stream::<u8>(&device, &config, producer, &running, &overflow)
            }
            fmt => {
                return Err(VoxbotError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| VoxbotError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VoxbotError::AudioStream(e.to_string()))?;

        let source = RingFrameSource::new(consumer, sample_rate, Arc::clone(&running), overflow);
        Ok((
            Self {
                _stream: stream,
                running,
                sample_rate,
            },
            source,
        ))
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Mono frames mixed per block inside the audio callback.
#[cfg(feature = "audio-cpal")]
const MIX_BUF_FRAMES: usize = 8192;

#[cfg(feature = "audio-cpal")]
fn build_mono_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: &Arc<AtomicBool>,
    overflow: &Arc<AtomicUsize>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = config.channels.max(1) as usize;
    let running = Arc::clone(running);
    let overflow = Arc::clone(overflow);
    let mut mix_buf = vec![0.0f32; MIX_BUF_FRAMES];

    device.build_input_stream(
        config,
        move |data: &[T], _info| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            let dropped = push_mono(data, ch, &mut mix_buf, &mut producer);
            if dropped > 0 {
                overflow.fetch_add(dropped, Ordering::Relaxed);
            }
        },
        |err| error!("audio stream error: {err}"),
        None,
    )
}

/// Downmix interleaved `data` to mono through `scratch` and push it into the
/// ring. Callbacks longer than `scratch` are mixed block by block. Returns the
/// number of mono samples the full ring dropped.
#[cfg(feature = "audio-cpal")]
fn push_mono<T>(
    data: &[T],
    channels: usize,
    scratch: &mut [f32],
    producer: &mut AudioProducer,
) -> usize
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut dropped = 0;
    for block in data.chunks(channels * scratch.len()) {
        let mixed = &mut scratch[..block.len() / channels];
        for (out, frame) in mixed.iter_mut().zip(block.chunks_exact(channels)) {
            let sum: f32 = frame.iter().map(|s| f32::from_sample(*s)).sum();
            *out = sum / channels as f32;
        }
        dropped += mixed.len() - producer.push_slice(mixed);
    }
    dropped
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open(
        _preferred_device: Option<&str>,
        _requested_rate: u32,
        _running: Arc<AtomicBool>,
    ) -> Result<(Self, RingFrameSource)> {
        Err(VoxbotError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
