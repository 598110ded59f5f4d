use thiserror::Error;

/// Startup-time configuration problems. These are reported before any
/// lane starts so a bad setting never surfaces mid-stream.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("FFT size {0} must be a power of two and at least 4")]
    InvalidFftSize(usize),

    #[error("sample rate must be positive, got {0}")]
    InvalidSampleRate(u32),

    #[error("frame size {frame} / hop size {hop} are invalid (frame >= FFT, 0 < hop <= frame)")]
    InvalidFrameLayout { frame: usize, hop: usize },

    #[error("queue capacity must be at least 1")]
    InvalidQueueCapacity,

    #[error("tick rate {0} Hz is outside 1..=240")]
    InvalidTickRate(u32),

    #[error("tempo {0} BPM is outside 30..=200")]
    TempoOutOfRange(f32),

    #[error("group '{group}' references unknown effect '{effect}'")]
    UnknownEffect { group: String, effect: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Per-cycle analysis failures. The engine turns these into a minimal
/// snapshot instead of propagating them.
#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("audio frame is empty")]
    EmptyFrame,

    #[error("non-finite sample {value} at index {index}")]
    NonFiniteSample { index: usize, value: f32 },
}

#[derive(Debug, Error, PartialEq)]
pub enum SyncError {
    #[error("unknown effect group {0}")]
    UnknownGroup(u64),

    #[error("unknown effect instance '{0}'")]
    UnknownEffect(String),

    #[error("tempo {0} BPM is outside 30..=200")]
    TempoOutOfRange(f32),

    #[error("invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: f32 },
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to read WAV input: {0}")]
    Wav(#[from] hound::Error),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("no audio input device available")]
    NoInputDevice,

    #[error("failed to query the input device: {0}")]
    InputConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to open the input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start the input stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio input thread exited before the stream started")]
    InputThreadExited,

    #[error("failed to start the audio input thread: {0}")]
    Io(#[from] std::io::Error),
}
