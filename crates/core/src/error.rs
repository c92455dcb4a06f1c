/// Result alias that carries the custom [`VisualiserError`] type.
pub type Result<T> = std::result::Result<T, VisualiserError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VisualiserError {
    /// Free-form error used where a structured variant would add nothing,
    /// e.g. "input device not found: USB Mic". It lets callers surface a
    /// readable message without committing to a taxonomy for one-off cases.
    #[error("{0}")]
    Message(String),
    /// A caller violated a documented precondition of a signal routine.
    #[error("{0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around FFT processing errors from `realfft`.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
    /// Audio device enumeration failed at the host level.
    #[error("device enumeration failed: {0}")]
    Devices(#[from] cpal::DevicesError),
    #[error("device name unavailable: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),
    #[error("no usable stream configuration: {0}")]
    DeviceConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to open audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

impl VisualiserError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for VisualiserError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VisualiserError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
