/// Result alias that carries the custom [`PulseVizError`] type.
pub type Result<T> = std::result::Result<T, PulseVizError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PulseVizError {
    /// Decoding or fetching a track failed. The caller that initiated the
    /// track switch recovers; the previously loaded track is left untouched.
    #[error("track load failed: {0}")]
    Load(String),
    /// An operation ran before the state it depends on existed, e.g. sampling
    /// the spectrum before a buffer finished loading or starting playback
    /// before tempo detection resolved. Contract violations surface
    /// immediately instead of silently returning zeros.
    #[error("not ready: {0}")]
    NotReady(&'static str),
    /// A band bin range collapsed to `end < start` after clamping. Validated
    /// threshold configurations can never produce this; it is guarded anyway.
    #[error("invalid band range: start bin {start} exceeds end bin {end}")]
    InvalidRange { start: usize, end: usize },
    /// Catch-all for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around FFT processing errors.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
    /// Wrapper around configuration (de)serialisation errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl PulseVizError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for PulseVizError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PulseVizError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
