//! Audio-side events: PCM frames, stream lifecycle markers, speech boundaries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::unix_now;

/// One block of interleaved float32 PCM.
///
/// Created by an audio source, rewritten by the resampler, and flagged by the
/// VAD gate (`in_speech`) before fan-out. Samples are shared so cloning a
/// frame for broadcast never copies audio data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFrame {
    /// URI identifying the stream this frame belongs to.
    pub source_id: String,
    /// Wall-clock seconds when the source session opened.
    pub stream_start: f64,
    /// Wall-clock seconds when the frame was handed to sinks.
    pub timestamp: f64,
    /// Seconds of audio in this frame.
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved float32 samples.
    #[serde(with = "shared_samples")]
    pub samples: Arc<[f32]>,
    /// Set by the VAD gate; false until the frame passes it.
    #[serde(default)]
    pub in_speech: bool,
}

impl AudioFrame {
    pub fn new(
        source_id: impl Into<String>,
        stream_start: f64,
        timestamp: f64,
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        let duration = if sample_rate == 0 || channels == 0 {
            0.0
        } else {
            samples.len() as f64 / channels as f64 / sample_rate as f64
        };
        Self {
            source_id: source_id.into(),
            stream_start,
            timestamp,
            duration,
            sample_rate,
            channels,
            samples: samples.into(),
            in_speech: false,
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

mod shared_samples {
    use std::sync::Arc;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(samples: &Arc<[f32]>, s: S) -> Result<S::Ok, S::Error> {
        samples.as_ref().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Arc<[f32]>, D::Error> {
        Vec::<f32>::deserialize(d).map(Arc::from)
    }
}

/// Stream lifecycle markers. One `Start` precedes any frame and exactly one
/// `Stop` ends a source session; capture failures emit `Error` then `Stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamMarker {
    Start {
        source_id: String,
        timestamp: f64,
        sample_rate: u32,
        channels: u16,
        block_size: u32,
    },
    Stop {
        source_id: String,
        timestamp: f64,
    },
    Error {
        source_id: String,
        timestamp: f64,
        message: String,
    },
}

impl StreamMarker {
    pub fn start(source_id: impl Into<String>, sample_rate: u32, channels: u16, block_size: u32) -> Self {
        StreamMarker::Start {
            source_id: source_id.into(),
            timestamp: unix_now(),
            sample_rate,
            channels,
            block_size,
        }
    }

    pub fn stop(source_id: impl Into<String>) -> Self {
        StreamMarker::Stop {
            source_id: source_id.into(),
            timestamp: unix_now(),
        }
    }

    pub fn error(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        StreamMarker::Error {
            source_id: source_id.into(),
            timestamp: unix_now(),
            message: message.into(),
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            StreamMarker::Start { source_id, .. }
            | StreamMarker::Stop { source_id, .. }
            | StreamMarker::Error { source_id, .. } => source_id,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            StreamMarker::Start { timestamp, .. }
            | StreamMarker::Stop { timestamp, .. }
            | StreamMarker::Error { timestamp, .. } => *timestamp,
        }
    }
}

/// Speech boundary markers emitted by the VAD gate.
///
/// `speech_start_time` already includes the pre-roll pad, so consumers can
/// recover padded audio with a plain time-range query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SpeechMarker {
    SpeechStart {
        source_id: String,
        timestamp: f64,
        speech_start_time: f64,
        threshold: f32,
        pad_ms: u32,
        silence_ms: u32,
    },
    SpeechStop {
        source_id: String,
        timestamp: f64,
        speech_start_time: f64,
        last_speech_frame_time: f64,
    },
}

impl SpeechMarker {
    pub fn source_id(&self) -> &str {
        match self {
            SpeechMarker::SpeechStart { source_id, .. }
            | SpeechMarker::SpeechStop { source_id, .. } => source_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration_from_samples() {
        let frame = AudioFrame::new("s", 0.0, 1.0, vec![0.0; 480], 16000, 1);
        assert!((frame.duration - 0.03).abs() < 1e-9);
        assert_eq!(frame.frame_count(), 480);
    }

    #[test]
    fn test_stereo_frame_count() {
        let frame = AudioFrame::new("s", 0.0, 1.0, vec![0.0; 960], 48000, 2);
        assert_eq!(frame.frame_count(), 480);
        assert!((frame.duration - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_frame_round_trips_through_json() {
        let frame = AudioFrame::new("s", 0.5, 1.5, vec![0.25, -0.25], 16000, 1);
        let json = serde_json::to_string(&frame).unwrap();
        let back: AudioFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.samples.as_ref(), &[0.25, -0.25]);
        assert_eq!(back.source_id, "s");
    }

    #[test]
    fn test_marker_accessors() {
        let marker = StreamMarker::error("mic", "device lost");
        assert_eq!(marker.source_id(), "mic");
        assert!(marker.timestamp() > 0.0);
    }
}
