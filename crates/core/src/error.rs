/// Result alias that carries the custom [`OculizerError`] type.
pub type Result<T> = std::result::Result<T, OculizerError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum OculizerError {
    /// No capture device matched the requested configuration.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The capture stream failed to open or reported a failure while running.
    #[error("audio stream error: {0}")]
    Stream(String),
    /// A requested (or previously current) scene is not part of the loaded set.
    #[error("scene `{0}` not found")]
    SceneNotFound(String),
    /// Invalid rig, scene or modulator parameters. Raised at load time.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A frequency band reaches beyond the Nyquist frequency of the stream.
    #[error("frequency {high_hz} Hz exceeds the Nyquist frequency of {nyquist_hz} Hz")]
    OutOfRange { high_hz: f32, nyquist_hz: f32 },
    /// A single light could not be evaluated during a tick.
    #[error("light `{light}` skipped: {reason}")]
    Mapping { light: String, reason: String },
    /// The fixture bus rejected a write.
    #[error("bus write at address {address} failed: {reason}")]
    BusWrite { address: u16, reason: String },
    /// Free-form message for failures that do not fit another variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON in a configuration, rig or scene file.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl OculizerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn mapping(light: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Mapping {
            light: light.into(),
            reason: reason.into(),
        }
    }

    /// Fatal errors stop the thread that raised them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_) | Self::Stream(_))
    }
}

impl From<&str> for OculizerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for OculizerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
