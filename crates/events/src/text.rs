//! Transcribed text events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::unix_now;

/// One decoded span, timed relative to its audio window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSegment {
    pub text: String,
    pub start_offset_ms: u64,
    pub end_offset_ms: u64,
}

/// The transcription of one scan window.
///
/// Invariants: `audio_end_time >= audio_start_time`; segment offsets are
/// non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextEvent {
    pub segments: Vec<TextSegment>,
    pub audio_source_id: String,
    pub audio_start_time: f64,
    pub audio_end_time: f64,
    pub event_id: Uuid,
    pub timestamp: f64,
}

impl TextEvent {
    pub fn new(
        segments: Vec<TextSegment>,
        audio_source_id: impl Into<String>,
        audio_start_time: f64,
        audio_end_time: f64,
    ) -> Self {
        Self {
            segments,
            audio_source_id: audio_source_id.into(),
            audio_start_time,
            audio_end_time,
            event_id: Uuid::new_v4(),
            timestamp: unix_now(),
        }
    }

    /// Convenience constructor for a single undivided span.
    pub fn from_text(
        text: impl Into<String>,
        audio_source_id: impl Into<String>,
        audio_start_time: f64,
        audio_end_time: f64,
    ) -> Self {
        let text = text.into();
        let end_ms = ((audio_end_time - audio_start_time).max(0.0) * 1000.0) as u64;
        Self::new(
            vec![TextSegment {
                text,
                start_offset_ms: 0,
                end_offset_ms: end_ms,
            }],
            audio_source_id,
            audio_start_time,
            audio_end_time,
        )
    }

    /// All segment text joined in order.
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_joins_segments() {
        let event = TextEvent::new(
            vec![
                TextSegment {
                    text: "hello".into(),
                    start_offset_ms: 0,
                    end_offset_ms: 400,
                },
                TextSegment {
                    text: " world".into(),
                    start_offset_ms: 400,
                    end_offset_ms: 900,
                },
            ],
            "src",
            1.0,
            2.0,
        );
        assert_eq!(event.text(), "hello world");
    }

    #[test]
    fn test_from_text_offsets() {
        let event = TextEvent::from_text("hi", "src", 2.0, 4.5);
        assert_eq!(event.segments.len(), 1);
        assert_eq!(event.segments[0].end_offset_ms, 2500);
    }
}
