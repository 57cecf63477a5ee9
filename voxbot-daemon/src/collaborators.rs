//! Subprocess-backed implementations of the engine's collaborator traits.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, warn};
use voxbot_core::engine::{AsrEngine, CameraCommand, FeedbackCue, SpeechSynthesizer};
use voxbot_core::TurnError;

const WAIT_POLL: Duration = Duration::from_millis(20);

pub const ASR_TIMEOUT: Duration = Duration::from_secs(30);
pub const TTS_TIMEOUT: Duration = Duration::from_secs(30);
pub const CAMERA_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `cmd` to completion, killing it after `timeout`.
///
/// Output is collected once the child exits, so this suits commands with
/// short output only.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> io::Result<Output> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    wait_with_timeout(&mut child, timeout)?;
    child.wait_with_output()
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out after {}s", timeout.as_secs()),
            ));
        }
        std::thread::sleep(WAIT_POLL);
    }
}

fn stderr_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_owned()
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Write mono f32 samples as a 16-bit PCM WAV.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)?;
    }
    writer.finalize()
}

/// Recognizer run as `<command> <file.wav>`; the transcript is its stdout.
pub struct SubprocessAsr {
    pub command: String,
    pub model_path: PathBuf,
    pub recordings_dir: PathBuf,
    pub timeout: Duration,
}

impl SubprocessAsr {
    fn run(&self, wav: &Path) -> Result<String, TurnError> {
        let output = run_with_timeout(
            Command::new(&self.command)
                .arg(wav)
                .env("ASR_MODEL", &self.model_path),
            self.timeout,
        )
        .map_err(|e| TurnError::Recognition(format!("{}: {e}", self.command)))?;

        if !output.status.success() {
            return Err(TurnError::Recognition(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr_line(&output)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

impl AsrEngine for SubprocessAsr {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, TurnError> {
        fs::create_dir_all(&self.recordings_dir)
            .map_err(|e| TurnError::Recognition(format!("recordings dir: {e}")))?;
        let wav = self
            .recordings_dir
            .join(format!("recording_{}.wav", timestamp()));
        write_wav(&wav, samples, sample_rate)
            .map_err(|e| TurnError::Recognition(format!("write {}: {e}", wav.display())))?;

        let result = self.run(&wav);
        if let Err(e) = fs::remove_file(&wav) {
            debug!(path = %wav.display(), error = %e, "could not remove recording");
        }
        result
    }
}

/// Speech output run as `<command> <text>`.
pub struct CommandTts {
    pub command: String,
    pub timeout: Duration,
}

impl SpeechSynthesizer for CommandTts {
    fn speak(&self, text: &str) -> Result<(), TurnError> {
        let output = run_with_timeout(Command::new(&self.command).arg(text), self.timeout)
            .map_err(|e| TurnError::Synthesis(format!("{}: {e}", self.command)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(TurnError::Synthesis(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr_line(&output)
            )))
        }
    }
}

/// `libcamera-still` capture into a directory.
pub struct LibcameraStill {
    pub dir: PathBuf,
    pub timeout: Duration,
}

impl LibcameraStill {
    fn args(path: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec!["-o".into(), path.into()];
        args.extend(
            ["-t", "1000", "--width", "640", "--height", "480", "--nopreview"]
                .iter()
                .map(Into::into),
        );
        args
    }
}

impl CameraCommand for LibcameraStill {
    fn capture(&self) -> Result<PathBuf, TurnError> {
        fs::create_dir_all(&self.dir).map_err(|e| TurnError::Capture(format!("camera dir: {e}")))?;
        let path = self.dir.join(format!("capture_{}.jpg", timestamp()));

        let output = run_with_timeout(
            Command::new("libcamera-still").args(Self::args(&path)),
            self.timeout,
        )
        .map_err(|e| TurnError::Capture(e.to_string()))?;
        if !output.status.success() {
            return Err(TurnError::Capture(format!(
                "libcamera-still exited with {}: {}",
                output.status,
                stderr_line(&output)
            )));
        }
        if !path.exists() {
            return Err(TurnError::Capture("no image written".into()));
        }
        Ok(path)
    }
}

/// Runs a sound command without waiting for it.
pub struct CommandCue {
    pub command: String,
}

impl FeedbackCue for CommandCue {
    fn play(&self) {
        let mut parts = self.command.split_whitespace();
        let Some(program) = parts.next() else {
            return;
        };
        match Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(mut child) => {
                // Reap off the poller thread.
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => warn!(command = self.command.as_str(), error = %e, "wake cue failed"),
        }
    }
}
