//! Scripted transcriber for tests and model-less development runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scrive_events::TextSegment;

use crate::{AudioWindow, Result, Transcriber};

/// Returns pre-scripted text for successive windows; once the script runs
/// dry it reports each window's duration instead. Scripts can be shared
/// between pool workers, so a multi-worker pool consumes one global script
/// in submission order.
pub struct StubTranscriber {
    script: Arc<Mutex<VecDeque<String>>>,
    delay: Duration,
}

impl StubTranscriber {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(lines: Vec<String>) -> Self {
        Self {
            script: Arc::new(Mutex::new(lines.into())),
            delay: Duration::ZERO,
        }
    }

    /// Share one script across factory-built instances.
    pub fn shared(script: Arc<Mutex<VecDeque<String>>>) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
        }
    }

    /// Simulate model latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for StubTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for StubTranscriber {
    fn transcribe(&mut self, window: &AudioWindow) -> Result<Vec<TextSegment>> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let text = self
            .script
            .lock()
            .expect("stub script mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| format!("[{:.2}s of audio]", window.duration()));
        Ok(vec![TextSegment {
            end_offset_ms: (window.duration() * 1000.0) as u64,
            start_offset_ms: 0,
            text,
        }])
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}
