//! Wire representation: class tags, subscription sets, JSON envelopes.
//!
//! Every serialized event carries an `event_class` tag, an `event_id`, a
//! float-seconds `timestamp`, and either a `source_id` or an `author_uri`.
//! Audio sample arrays travel as plain JSON arrays of float32.

use std::collections::HashSet;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::{DraftEvent, Event, SpeechMarker, StreamMarker};

/// Closed set of event class tags understood by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    AudioStart,
    AudioStop,
    AudioChunk,
    AudioSpeechStart,
    AudioSpeechStop,
    AudioError,
    Text,
    DraftStart,
    DraftEnd,
    DraftRescan,
}

impl EventClass {
    pub const ALL: [EventClass; 10] = [
        EventClass::AudioStart,
        EventClass::AudioStop,
        EventClass::AudioChunk,
        EventClass::AudioSpeechStart,
        EventClass::AudioSpeechStop,
        EventClass::AudioError,
        EventClass::Text,
        EventClass::DraftStart,
        EventClass::DraftEnd,
        EventClass::DraftRescan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::AudioStart => "AudioStart",
            EventClass::AudioStop => "AudioStop",
            EventClass::AudioChunk => "AudioChunk",
            EventClass::AudioSpeechStart => "AudioSpeechStart",
            EventClass::AudioSpeechStop => "AudioSpeechStop",
            EventClass::AudioError => "AudioError",
            EventClass::Text => "Text",
            EventClass::DraftStart => "DraftStart",
            EventClass::DraftEnd => "DraftEnd",
            EventClass::DraftRescan => "DraftRescan",
        }
    }

    pub fn parse(name: &str) -> Option<EventClass> {
        match name {
            "AudioStart" => Some(EventClass::AudioStart),
            "AudioStop" => Some(EventClass::AudioStop),
            "AudioChunk" => Some(EventClass::AudioChunk),
            "AudioSpeechStart" => Some(EventClass::AudioSpeechStart),
            "AudioSpeechStop" => Some(EventClass::AudioSpeechStop),
            "AudioError" => Some(EventClass::AudioError),
            // Clients written against the event type names rather than the
            // class tags still subscribe successfully.
            "Text" | "TextEvent" => Some(EventClass::Text),
            "DraftStart" => Some(EventClass::DraftStart),
            "DraftEnd" => Some(EventClass::DraftEnd),
            "DraftRescan" => Some(EventClass::DraftRescan),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("invalid event class requested: {0}")]
    InvalidClass(String),
    #[error("no event classes specified")]
    Empty,
}

/// Expand requested class names into a concrete subscription set.
///
/// `all` and `all_but_chunks` both expand to every known class except
/// `AudioChunk`; the bulk frame stream is always an explicit opt-in by
/// name. Unknown names fail the whole registration.
pub fn expand_subscription(names: &[String]) -> Result<HashSet<EventClass>, SubscriptionError> {
    if names.is_empty() {
        return Err(SubscriptionError::Empty);
    }
    let mut classes = HashSet::new();
    for name in names {
        match name.as_str() {
            "all" | "all_but_chunks" => {
                classes.extend(
                    EventClass::ALL
                        .iter()
                        .copied()
                        .filter(|c| *c != EventClass::AudioChunk),
                );
            }
            other => match EventClass::parse(other) {
                Some(class) => {
                    classes.insert(class);
                }
                None => return Err(SubscriptionError::InvalidClass(other.to_string())),
            },
        }
    }
    Ok(classes)
}

/// Serialize an event into its JSON wire envelope.
///
/// `author_uri` identifies the publishing server; it is attached to every
/// envelope so downstream consumers can tell relayed events apart.
pub fn serialize_event(event: &Event, author_uri: &str) -> Value {
    let class = event.class().as_str();
    match event {
        Event::Audio(frame) => json!({
            "event_class": class,
            "event_id": Uuid::new_v4(),
            "timestamp": frame.timestamp,
            "source_id": frame.source_id,
            "author_uri": author_uri,
            "stream_start": frame.stream_start,
            "duration": frame.duration,
            "sample_rate": frame.sample_rate,
            "channels": frame.channels,
            "in_speech": frame.in_speech,
            "data": frame.samples.as_ref(),
        }),
        Event::Stream(marker) => {
            let mut value = json!({
                "event_class": class,
                "event_id": Uuid::new_v4(),
                "timestamp": marker.timestamp(),
                "source_id": marker.source_id(),
                "author_uri": author_uri,
            });
            let fields = value.as_object_mut().expect("envelope is an object");
            match marker {
                StreamMarker::Start {
                    sample_rate,
                    channels,
                    block_size,
                    ..
                } => {
                    fields.insert("sample_rate".into(), json!(sample_rate));
                    fields.insert("channels".into(), json!(channels));
                    fields.insert("block_size".into(), json!(block_size));
                }
                StreamMarker::Stop { .. } => {}
                StreamMarker::Error { message, .. } => {
                    fields.insert("message".into(), json!(message));
                }
            }
            value
        }
        Event::Speech(marker) => match marker {
            SpeechMarker::SpeechStart {
                source_id,
                timestamp,
                speech_start_time,
                threshold,
                pad_ms,
                silence_ms,
            } => json!({
                "event_class": class,
                "event_id": Uuid::new_v4(),
                "timestamp": timestamp,
                "source_id": source_id,
                "author_uri": author_uri,
                "speech_start_time": speech_start_time,
                "threshold": threshold,
                "pad_ms": pad_ms,
                "silence_ms": silence_ms,
            }),
            SpeechMarker::SpeechStop {
                source_id,
                timestamp,
                speech_start_time,
                last_speech_frame_time,
            } => json!({
                "event_class": class,
                "event_id": Uuid::new_v4(),
                "timestamp": timestamp,
                "source_id": source_id,
                "author_uri": author_uri,
                "speech_start_time": speech_start_time,
                "last_speech_frame_time": last_speech_frame_time,
            }),
        },
        Event::Text(text) => json!({
            "event_class": class,
            "event_id": text.event_id,
            "timestamp": text.timestamp,
            "source_id": text.audio_source_id,
            "author_uri": author_uri,
            "audio_start_time": text.audio_start_time,
            "audio_end_time": text.audio_end_time,
            "segments": text.segments,
        }),
        Event::Draft(draft_event) => {
            let (event_id, timestamp) = match draft_event {
                DraftEvent::Start {
                    event_id, timestamp, ..
                }
                | DraftEvent::End {
                    event_id, timestamp, ..
                }
                | DraftEvent::Rescan {
                    event_id, timestamp, ..
                } => (*event_id, *timestamp),
            };
            let mut value = json!({
                "event_class": class,
                "event_id": event_id,
                "timestamp": timestamp,
                "author_uri": author_uri,
                "draft": draft_event.draft(),
            });
            if let DraftEvent::Rescan {
                revision_source,
                original_draft_id,
                approved_suggestions,
                revised_text,
                ..
            } = draft_event
            {
                let fields = value.as_object_mut().expect("envelope is an object");
                fields.insert("revision_source".into(), json!(revision_source));
                fields.insert("original_draft_id".into(), json!(original_draft_id));
                fields.insert("approved_suggestions".into(), json!(approved_suggestions));
                fields.insert("revised_text".into(), json!(revised_text));
            }
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioFrame, Draft, TextEvent, TextMark};

    #[test]
    fn test_expand_explicit_classes() {
        let classes =
            expand_subscription(&["Text".to_string(), "DraftEnd".to_string()]).unwrap();
        assert_eq!(classes.len(), 2);
        assert!(classes.contains(&EventClass::Text));
        assert!(classes.contains(&EventClass::DraftEnd));
    }

    #[test]
    fn test_expand_all_excludes_chunks() {
        let classes = expand_subscription(&["all".to_string()]).unwrap();
        assert!(!classes.contains(&EventClass::AudioChunk));
        assert_eq!(classes.len(), EventClass::ALL.len() - 1);

        let classes = expand_subscription(&["all_but_chunks".to_string()]).unwrap();
        assert!(!classes.contains(&EventClass::AudioChunk));
    }

    #[test]
    fn test_expand_all_plus_explicit_chunks() {
        let classes =
            expand_subscription(&["all".to_string(), "AudioChunk".to_string()]).unwrap();
        assert!(classes.contains(&EventClass::AudioChunk));
        assert_eq!(classes.len(), EventClass::ALL.len());
    }

    #[test]
    fn test_expand_rejects_unknown() {
        let err = expand_subscription(&["Bogus".to_string()]).unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidClass(name) if name == "Bogus"));

        assert!(matches!(
            expand_subscription(&[]),
            Err(SubscriptionError::Empty)
        ));
    }

    #[test]
    fn test_chunk_envelope_carries_samples() {
        let frame = AudioFrame::new("mic", 0.0, 2.0, vec![0.5, -0.5], 16000, 1);
        let value = serialize_event(&Event::Audio(frame), "http://host:9000/routes");
        assert_eq!(value["event_class"], "AudioChunk");
        assert_eq!(value["data"].as_array().unwrap().len(), 2);
        assert_eq!(value["source_id"], "mic");
        assert_eq!(value["author_uri"], "http://host:9000/routes");
    }

    #[test]
    fn test_text_envelope_uses_event_identity() {
        let text = TextEvent::from_text("hello", "mic", 1.0, 2.0);
        let expected_id = text.event_id.to_string();
        let value = serialize_event(&Event::Text(text), "uri");
        assert_eq!(value["event_class"], "Text");
        assert_eq!(value["event_id"], expected_id.as_str());
        assert_eq!(value["segments"][0]["text"], "hello");
    }

    #[test]
    fn test_draft_envelope() {
        let draft = Draft::open(
            TextMark {
                start: 0,
                end: 4,
                text: "mark".into(),
            },
            None,
            1.0,
        );
        let value = serialize_event(&Event::Draft(DraftEvent::start(draft)), "uri");
        assert_eq!(value["event_class"], "DraftStart");
        assert_eq!(value["draft"]["start_mark"]["text"], "mark");
    }
}
