//! Process-wide error kinds carried on the pipeline error channel.

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Capture lost or invalid device state; fatal for the session.
    #[error("device error: {0}")]
    Device(String),
    /// Incompatible sample parameters; fatal.
    #[error("format error: {0}")]
    Format(String),
    /// Classifier failed repeatedly; fatal after three strikes.
    #[error("classifier error: {0}")]
    Classifier(String),
    /// Worker pool gave up (restarts exhausted) or its queue closed.
    #[error("transcriber error: {0}")]
    Transcriber(String),
    #[error("storage error: {0}")]
    Storage(String),
    /// Not an error: an orderly teardown was requested.
    #[error("shutdown requested")]
    ShutdownRequested,
}
