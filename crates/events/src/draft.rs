//! Draft events: text blocks delimited by spoken command phrases.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::unix_now;

/// A matched span in the assembler's working text.
///
/// `start` is an inclusive character offset, `end` exclusive, and `text` the
/// original (un-normalized) slice between them. A synthesized mark from
/// `end_of_input` or a split carries an empty `text` with `start == end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMark {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl TextMark {
    pub fn empty_at(offset: usize) -> Self {
        Self {
            start: offset,
            end: offset,
            text: String::new(),
        }
    }
}

/// A text block bounded by spoken start/end command phrases.
///
/// While open, `end_mark` is `None` and `full_text` grows only by appending;
/// once closed both are immutable. `full_text` holds the body between the
/// marks, whitespace-trimmed; the command phrases themselves are not part
/// of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub draft_id: Uuid,
    /// Previous draft of the session, `None` for the first.
    pub parent_draft_id: Option<Uuid>,
    pub start_mark: TextMark,
    pub end_mark: Option<TextMark>,
    pub full_text: String,
    /// Wall-clock creation time.
    pub timestamp: f64,
    /// Audio span of the text events that contributed to this draft.
    pub audio_start_time: f64,
    pub audio_end_time: f64,
}

impl Draft {
    pub fn open(start_mark: TextMark, parent_draft_id: Option<Uuid>, audio_start_time: f64) -> Self {
        Self {
            draft_id: Uuid::new_v4(),
            parent_draft_id,
            start_mark,
            end_mark: None,
            full_text: String::new(),
            timestamp: unix_now(),
            audio_start_time,
            audio_end_time: audio_start_time,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_mark.is_none()
    }
}

/// How a revision of a draft was produced.
///
/// Conflict priority when readers merge: `Human` > `Llm` >
/// `WhisperReprocess` > `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionSource {
    Unknown,
    WhisperReprocess,
    Llm,
    Human,
}

impl RevisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionSource::Unknown => "unknown",
            RevisionSource::WhisperReprocess => "whisper_reprocess",
            RevisionSource::Llm => "llm",
            RevisionSource::Human => "human",
        }
    }
}

impl std::str::FromStr for RevisionSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "unknown" => Ok(RevisionSource::Unknown),
            "whisper_reprocess" => Ok(RevisionSource::WhisperReprocess),
            "llm" => Ok(RevisionSource::Llm),
            "human" => Ok(RevisionSource::Human),
            _ => Err(()),
        }
    }
}

/// Lifecycle events for drafts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DraftEvent {
    Start {
        draft: Draft,
        event_id: Uuid,
        timestamp: f64,
    },
    End {
        draft: Draft,
        event_id: Uuid,
        timestamp: f64,
    },
    /// A revised transcription of an earlier draft, produced by a rescan,
    /// an LLM pass, or a human edit.
    Rescan {
        draft: Draft,
        event_id: Uuid,
        timestamp: f64,
        revision_source: RevisionSource,
        original_draft_id: Uuid,
        approved_suggestions: Vec<usize>,
        revised_text: String,
    },
}

impl DraftEvent {
    pub fn start(draft: Draft) -> Self {
        DraftEvent::Start {
            draft,
            event_id: Uuid::new_v4(),
            timestamp: unix_now(),
        }
    }

    pub fn end(draft: Draft) -> Self {
        DraftEvent::End {
            draft,
            event_id: Uuid::new_v4(),
            timestamp: unix_now(),
        }
    }

    pub fn rescan(
        draft: Draft,
        revision_source: RevisionSource,
        original_draft_id: Uuid,
        revised_text: String,
    ) -> Self {
        DraftEvent::Rescan {
            draft,
            event_id: Uuid::new_v4(),
            timestamp: unix_now(),
            revision_source,
            original_draft_id,
            approved_suggestions: Vec::new(),
            revised_text,
        }
    }

    pub fn draft(&self) -> &Draft {
        match self {
            DraftEvent::Start { draft, .. }
            | DraftEvent::End { draft, .. }
            | DraftEvent::Rescan { draft, .. } => draft,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_draft_has_no_end_mark() {
        let mark = TextMark {
            start: 0,
            end: 5,
            text: "start".into(),
        };
        let draft = Draft::open(mark, None, 1.0);
        assert!(draft.is_open());
        assert!(draft.full_text.is_empty());
    }

    #[test]
    fn test_revision_source_round_trip() {
        for source in [
            RevisionSource::Unknown,
            RevisionSource::WhisperReprocess,
            RevisionSource::Llm,
            RevisionSource::Human,
        ] {
            assert_eq!(source.as_str().parse::<RevisionSource>(), Ok(source));
        }
        assert!("robot".parse::<RevisionSource>().is_err());
    }
}
