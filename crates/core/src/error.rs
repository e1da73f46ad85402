/// Result alias that carries the custom [`BeatSyncError`] type.
pub type Result<T> = std::result::Result<T, BeatSyncError>;

/// Common error type for the core crate.
///
/// Only configuration, timeline loading and I/O surface these to callers.
/// The per-tick paths (detection, scheduling) recover locally and never
/// return an error.
#[derive(Debug, thiserror::Error)]
pub enum BeatSyncError {
    /// Free-form message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Config or timeline document could not be parsed.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// The FFT planner rejected the buffers it was handed.
    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
    /// A tunable is unknown or outside its accepted range.
    #[error("invalid config value for `{key}`: {reason}")]
    InvalidConfig { key: String, reason: String },
    /// An effect name that does not map to a known effect.
    #[error("unknown effect `{0}`")]
    UnknownEffect(String),
    /// The spectrum source cannot produce a snapshot right now.
    #[error("spectrum source unavailable: {0}")]
    SourceUnavailable(&'static str),
}

impl BeatSyncError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<&str> for BeatSyncError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatSyncError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
