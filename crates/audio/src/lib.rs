mod resample;
mod ring;
mod source;

pub use resample::Resampler;
pub use ring::AudioRing;
pub use source::{create_source_id, AudioSource, FileSource, MicSource, RemoteSource};

/// Canonical pipeline sample rate. Everything downstream of the resampler
/// sees 16 kHz mono.
pub const SAMPLE_RATE: u32 = 16000;
pub const TARGET_CHANNELS: u16 = 1;

/// Frame cadence produced by the built-in sources.
pub const CHUNK_SECONDS: f64 = 0.03;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("stream error: {0}")]
    StreamError(String),
    #[error("incompatible sample parameters: {0}")]
    FormatError(String),
    #[error("file error: {0}")]
    FileError(#[from] hound::Error),
    #[error("device error: {0}")]
    DeviceError(#[from] cpal::DevicesError),
    #[error("build stream error: {0}")]
    BuildStreamError(#[from] cpal::BuildStreamError),
    #[error("connect error: {0}")]
    ConnectError(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;
