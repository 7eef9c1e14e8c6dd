mod energy;
mod gate;

pub use energy::EnergyClassifier;
pub use gate::{VadGate, VadGateConfig};

/// Fixed classifier window: 512 samples at 16 kHz (32 ms).
pub const VAD_WINDOW: usize = 512;
pub const VAD_SAMPLE_RATE: u32 = 16000;

#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("classifier inference error: {0}")]
    InferenceError(String),
    #[error("classifier failed {0} consecutive times")]
    ClassifierFailed(u32),
}

pub type Result<T> = std::result::Result<T, VadError>;

/// Boundary signals for one classifier window.
///
/// `start` and `end` may both be false (no transition); a classifier that
/// straddles a very short utterance may set both on the same window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundarySignal {
    pub start: bool,
    pub end: bool,
}

impl BoundarySignal {
    pub const NONE: BoundarySignal = BoundarySignal {
        start: false,
        end: false,
    };

    pub fn start() -> Self {
        Self {
            start: true,
            end: false,
        }
    }

    pub fn end() -> Self {
        Self {
            start: false,
            end: true,
        }
    }
}

/// External speech/non-speech classifier.
///
/// Consumes fixed-size 16 kHz mono windows ([`VAD_WINDOW`] samples) and
/// reports boundary transitions. Implementations own whatever model state
/// they need; `reset` drops it at configuration changes.
pub trait SpeechClassifier: Send {
    fn classify(&mut self, window: &[f32]) -> Result<BoundarySignal>;
    fn reset(&mut self);
}
