mod scan;
mod stub;
mod worker;

pub use scan::ScanBuffer;
pub use stub::StubTranscriber;
pub use worker::{WorkerOutput, WorkerPool};

use std::path::PathBuf;
use std::time::Duration;

use scrive_events::TextSegment;

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("model error: {0}")]
    ModelError(String),
    #[error("worker pool is shut down")]
    PoolClosed,
    #[error("worker crashed {0} times, giving up")]
    RestartsExhausted(u32),
}

pub type Result<T> = std::result::Result<T, TranscribeError>;

/// One scan window of 16 kHz mono audio handed to a worker.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub start_time: f64,
    pub end_time: f64,
    pub source_id: String,
}

impl AudioWindow {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// External ASR engine. Implementations run on a pool worker thread and may
/// block; the model instance is owned exclusively by its worker.
pub trait Transcriber: Send {
    fn transcribe(&mut self, window: &AudioWindow) -> Result<Vec<TextSegment>>;

    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Builds one transcriber per worker (and per restart after a crash).
pub type TranscriberFactory = std::sync::Arc<dyn Fn() -> Result<Box<dyn Transcriber>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub model_path: Option<PathBuf>,
    /// Overlap prepended to the front of each window to stabilize context.
    pub pre_buffer_seconds: f64,
    /// Full scan window length.
    pub seconds_per_scan: f64,
    /// Optional initial context hint for the model.
    pub prompt: Option<String>,
    /// Per-window processing deadline; an overdue window is abandoned.
    pub timeout: Duration,
    pub workers: usize,
    /// Worker restarts tolerated before the pool gives up.
    pub max_restarts: u32,
    /// Bounded request queue depth; a full queue backpressures the scan
    /// stage cooperatively.
    pub queue_depth: usize,
    /// Final windows shorter than this are discarded, not transcribed.
    pub min_segment_duration: f64,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            pre_buffer_seconds: 0.5,
            seconds_per_scan: 10.0,
            prompt: None,
            timeout: Duration::from_secs(60),
            workers: 2,
            max_restarts: 3,
            queue_depth: 4,
            min_segment_duration: 1.2,
        }
    }
}
