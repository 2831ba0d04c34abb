use thiserror::Error;

/// Rejected [`SynthConfig`](crate::SynthConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("sample rate {0} Hz is outside {min}..={max} Hz", min = crate::config::MIN_SAMPLE_RATE, max = crate::config::MAX_SAMPLE_RATE)]
    SampleRate(u32),
    #[error("control ratio {0} is outside 1..={max}", max = crate::config::MAX_CONTROL_RATIO)]
    ControlRatio(u32),
    #[error("voice pool capacity must be at least 1")]
    NoVoices,
    #[error("buffer of {0} frames is outside 1..={max}", max = crate::MAX_BLOCK_SIZE)]
    BufferFrames(usize),
    #[error("channel count {0} is outside 1..={max}", max = crate::config::MAX_CHANNELS)]
    Channels(usize),
}

/// Failures reported by an [`OutputSink`](crate::io::sink::OutputSink).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("output sink disconnected")]
    Disconnected,
    #[error("buffer of {buffer} samples does not fit a sink holding {capacity}")]
    Capacity { buffer: usize, capacity: usize },
    #[error("output sink failed: {0}")]
    Io(String),
}

/// Errors that cross the engine boundary. Only [`SynthError::Sink`] aborts playback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("playback aborted: {0}")]
    Sink(#[from] SinkError),
}
