use thiserror::Error;

/// Startup and infrastructure errors produced by voxbot-core.
///
/// These are the only errors that may end the process. Everything that goes
/// wrong inside a single interaction is a [`TurnError`] instead.
#[derive(Debug, Error)]
pub enum VoxbotError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("resampler error: {0}")]
    Resampler(String),

    #[error("unsupported rate conversion {from} Hz -> {to} Hz (integer decimation only)")]
    UnsupportedRatio { from: u32, to: u32 },

    #[error("required model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("invalid command pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxbotError>;

/// Failures from the language-model side of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("language model unreachable: {0}")]
    Connection(String),

    #[error("language model request timed out")]
    Timeout,

    #[error("language model returned HTTP {0}")]
    Status(u16),

    #[error("malformed language model response: {0}")]
    Malformed(String),

    #[error("unknown tool requested: {0}")]
    UnknownTool(String),

    #[error("language model produced no answer")]
    Empty,

    #[error("no language model service configured")]
    NotConfigured,
}

impl GenerationError {
    /// Transport failures are retried against the secondary service.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout)
    }
}

/// Recoverable failure of one interaction. Every variant sends the state
/// machine back to its rest state; none of them is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    /// No usable audio. Reported as "no speech", never as a fault.
    #[error("no usable audio: {0}")]
    Acquisition(String),

    #[error("recognition failed: {0}")]
    Recognition(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("camera capture failed: {0}")]
    Capture(String),

    /// Another actor (RESET, a new session) moved the state machine on.
    /// The turn stops quietly and leaves the state alone.
    #[error("turn superseded, state is now {0}")]
    Superseded(String),
}
