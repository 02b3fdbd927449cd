/// Result alias that carries the custom [`LightSyncError`] type.
pub type Result<T> = std::result::Result<T, LightSyncError>;

/// Common error type for the core crate.
///
/// Admission conflicts and stops of unknown effects are not errors; they are
/// reported through [`crate::StartOutcome`] and [`crate::CancelOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum LightSyncError {
    /// Free-form failure that does not fit any other category.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration or effect program could not be (de)serialised.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Caller supplied data that can never be processed.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Configuration value outside of its allowed range.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// No audio hardware, no capture backend, or an invalid device index.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A single capture read failed. The capture loop retries after a backoff.
    #[error("audio capture failed: {0}")]
    Capture(String),
    /// A light or group disappeared while an effect was driving it.
    #[error("light target `{0}` no longer exists")]
    MissingTarget(String),
    /// The gateway rejected a command or the target was unreachable.
    #[error("light command failed: {0}")]
    Sink(String),
    /// Frequency transform failure.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
    /// A shared lock was poisoned by a panicking thread.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
}

impl LightSyncError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns `true` for failures that only affect a single command frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Sink(_) | Self::Capture(_))
    }
}

impl From<&str> for LightSyncError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LightSyncError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
