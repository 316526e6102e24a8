mod focus;
mod mic;
mod source;

pub use focus::{AudioFocus, NoopFocus};
pub use mic::{MicDevice, MicSource};
pub use source::{CaptureDevice, FrameSource};

/// Working sample rate for the whole capture pipeline (16kHz mono).
pub const SAMPLE_RATE: u32 = 16000;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("stream error: {0}")]
    StreamError(String),
    #[error("device error: {0}")]
    DeviceError(#[from] cpal::DevicesError),
    #[error("build stream error: {0}")]
    BuildStreamError(#[from] cpal::BuildStreamError),
}

pub type Result<T> = std::result::Result<T, AudioError>;
