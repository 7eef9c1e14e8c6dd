//! Shared event contracts for the dictation pipeline.
//!
//! This crate defines the formal contracts (DTOs) for events that flow
//! between pipeline stages and out to subscribers. Using shared types
//! prevents runtime deserialization errors from mismatched field names.
//!
//! Also provides the typed in-process [`EventBus`] for decoupled fan-out.

mod audio;
mod bus;
mod draft;
mod status;
mod text;
mod wire;

pub use audio::{AudioFrame, SpeechMarker, StreamMarker};
pub use bus::{EventBus, SubscriberId};
pub use draft::{Draft, DraftEvent, RevisionSource, TextMark};
pub use status::{PipelineStatus, PipelineStatusSnapshot};
pub use text::{TextEvent, TextSegment};
pub use wire::{expand_subscription, serialize_event, EventClass, SubscriptionError};

use std::sync::Arc;

/// Closed sum of everything that can travel through the pipeline.
///
/// The wire representation carries an `event_class` tag; see [`wire`].
#[derive(Debug, Clone)]
pub enum Event {
    Audio(AudioFrame),
    Stream(StreamMarker),
    Speech(SpeechMarker),
    Text(TextEvent),
    Draft(DraftEvent),
}

impl Event {
    /// The wire class tag for this event.
    pub fn class(&self) -> EventClass {
        match self {
            Event::Audio(_) => EventClass::AudioChunk,
            Event::Stream(StreamMarker::Start { .. }) => EventClass::AudioStart,
            Event::Stream(StreamMarker::Stop { .. }) => EventClass::AudioStop,
            Event::Stream(StreamMarker::Error { .. }) => EventClass::AudioError,
            Event::Speech(SpeechMarker::SpeechStart { .. }) => EventClass::AudioSpeechStart,
            Event::Speech(SpeechMarker::SpeechStop { .. }) => EventClass::AudioSpeechStop,
            Event::Text(_) => EventClass::Text,
            Event::Draft(DraftEvent::Start { .. }) => EventClass::DraftStart,
            Event::Draft(DraftEvent::End { .. }) => EventClass::DraftEnd,
            Event::Draft(DraftEvent::Rescan { .. }) => EventClass::DraftRescan,
        }
    }

    /// Identifier of the stream or author this event belongs to.
    pub fn source_id(&self) -> &str {
        match self {
            Event::Audio(frame) => &frame.source_id,
            Event::Stream(marker) => marker.source_id(),
            Event::Speech(marker) => marker.source_id(),
            Event::Text(text) => &text.audio_source_id,
            Event::Draft(_) => "",
        }
    }

    pub fn into_shared(self) -> Arc<Event> {
        Arc::new(self)
    }
}

/// Wall-clock time as float seconds since the unix epoch.
///
/// Frame timestamps, draft timestamps, and the `since` query parameter all
/// share this representation.
pub fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_class_mapping() {
        let frame = AudioFrame::new("src", 0.0, 0.0, vec![0.0; 480], 16000, 1);
        assert_eq!(Event::Audio(frame).class(), EventClass::AudioChunk);

        let stop = StreamMarker::stop("src");
        assert_eq!(Event::Stream(stop).class(), EventClass::AudioStop);
    }

    #[test]
    fn test_unix_now_is_positive() {
        assert!(unix_now() > 1_000_000_000.0);
    }
}
