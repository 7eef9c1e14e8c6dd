//! Draft assembly over a growing text buffer.
//!
//! Text events append to `working_text`; the assembler scans left-to-right
//! for command phrases. A start match opens a draft, an end match closes it,
//! and a start match arriving while a draft is open splits: the open draft
//! closes at the match position with a synthesized empty end mark and the
//! new draft opens in its place. `end_of_input` closes any draft still open.
//!
//! Replaying the same text event stream yields identical drafts modulo
//! `draft_id` and `timestamp`.

use scrive_events::{Draft, DraftEvent, TextEvent, TextMark};
use uuid::Uuid;

use crate::matcher::{match_first, meaningful_tokens, MatchPattern, MatchResult, Token};

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub start_phrases: Vec<String>,
    pub end_phrases: Vec<String>,
    /// Fuzzy match threshold in `[0, 1]`.
    pub threshold: f32,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            start_phrases: vec![
                "Freddy take this down".to_string(),
                "Freddy new draft".to_string(),
            ],
            end_phrases: vec!["Freddy break break".to_string()],
            threshold: 0.80,
        }
    }
}

/// Maps a span of `working_text` back to the audio of the event that
/// produced it.
struct SegmentSpan {
    /// Exclusive end offset of this event's contribution.
    end_offset: usize,
    audio_start: f64,
    audio_end: f64,
}

pub struct DraftAssembler {
    working_text: String,
    /// Scanning resumes here; everything before it is consumed by marks.
    scan_from: usize,
    start_patterns: Vec<MatchPattern>,
    end_patterns: Vec<MatchPattern>,
    threshold: f32,
    current: Option<Draft>,
    previous_draft_id: Option<Uuid>,
    spans: Vec<SegmentSpan>,
}

impl DraftAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            working_text: String::new(),
            scan_from: 0,
            start_patterns: config
                .start_phrases
                .iter()
                .map(|p| MatchPattern::new(p))
                .collect(),
            end_patterns: config
                .end_phrases
                .iter()
                .map(|p| MatchPattern::new(p))
                .collect(),
            threshold: config.threshold,
            current: None,
            previous_draft_id: None,
            spans: Vec::new(),
        }
    }

    pub fn working_text(&self) -> &str {
        &self.working_text
    }

    pub fn current_draft(&self) -> Option<&Draft> {
        self.current.as_ref()
    }

    /// Feed one text event; returns the draft events it triggered, in order.
    pub fn on_text_event(&mut self, event: &TextEvent) -> Vec<DraftEvent> {
        self.append(event);

        let mut out = Vec::new();
        loop {
            let tokens = self.tail_tokens();
            let next = match self.current {
                None => self
                    .find(&tokens, Relevant::Start)
                    .map(|m| (m, MatchKind::Start)),
                Some(_) => {
                    // Both sets are relevant while a draft is open; the
                    // earliest span wins and an end match beats a start
                    // match at the same position.
                    let end = self.find(&tokens, Relevant::End);
                    let start = self.find(&tokens, Relevant::Start);
                    match (end, start) {
                        (Some(e), Some(s)) if s.start < e.start => {
                            Some((s, MatchKind::Start))
                        }
                        (Some(e), _) => Some((e, MatchKind::End)),
                        (None, Some(s)) => Some((s, MatchKind::Start)),
                        (None, None) => None,
                    }
                }
            };
            let Some((m, kind)) = next else { break };
            match kind {
                MatchKind::Start => {
                    if let Some(open) = self.current.take() {
                        out.push(self.close_draft(open, TextMark::empty_at(m.start)));
                    }
                    out.push(self.open_draft(&m));
                }
                MatchKind::End => {
                    let open = self.current.take().expect("end match without open draft");
                    let end_mark = TextMark {
                        start: m.start,
                        end: m.end,
                        text: self.working_text[m.start..m.end].to_string(),
                    };
                    out.push(self.close_draft(open, end_mark));
                }
            }
            self.scan_from = m.end;
        }

        // The open draft's text grows by appending at the tail.
        if let Some(draft) = self.current.as_mut() {
            draft.full_text = self.working_text[draft.start_mark.end..]
                .trim()
                .to_string();
            if let Some(span) = self.spans.last() {
                draft.audio_end_time = span.audio_end;
            }
        }
        out
    }

    /// Close any still-open draft with an empty synthesized end mark.
    pub fn end_of_input(&mut self) -> Option<DraftEvent> {
        let open = self.current.take()?;
        let mark = TextMark::empty_at(self.working_text.len());
        Some(self.close_draft(open, mark))
    }

    fn append(&mut self, event: &TextEvent) {
        let text = event.text();
        if !self.working_text.is_empty()
            && !self.working_text.ends_with(char::is_whitespace)
            && !text.starts_with(char::is_whitespace)
        {
            self.working_text.push(' ');
        }
        self.working_text.push_str(&text);
        self.spans.push(SegmentSpan {
            end_offset: self.working_text.len(),
            audio_start: event.audio_start_time,
            audio_end: event.audio_end_time,
        });
    }

    fn tail_tokens(&self) -> Vec<Token> {
        let mut tokens = meaningful_tokens(&self.working_text[self.scan_from..]);
        for token in &mut tokens {
            token.start += self.scan_from;
            token.end += self.scan_from;
        }
        tokens
    }

    fn find(&self, tokens: &[Token], which: Relevant) -> Option<MatchResult> {
        let patterns = match which {
            Relevant::Start => &self.start_patterns,
            Relevant::End => &self.end_patterns,
        };
        match_first(&self.working_text, tokens, patterns, self.threshold)
    }

    fn open_draft(&mut self, m: &MatchResult) -> DraftEvent {
        let mark = TextMark {
            start: m.start,
            end: m.end,
            text: self.working_text[m.start..m.end].to_string(),
        };
        let audio_start = self.audio_span_at(m.start).0;
        let mut draft = Draft::open(mark, self.previous_draft_id, audio_start);
        if let Some(span) = self.spans.last() {
            draft.audio_end_time = span.audio_end;
        }
        self.previous_draft_id = Some(draft.draft_id);
        tracing::debug!(draft_id = %draft.draft_id, score = m.score, "draft opened");
        self.current = Some(draft.clone());
        DraftEvent::start(draft)
    }

    fn close_draft(&mut self, mut draft: Draft, end_mark: TextMark) -> DraftEvent {
        draft.full_text = self.working_text[draft.start_mark.end..end_mark.start]
            .trim()
            .to_string();
        draft.audio_end_time = self.audio_span_at(end_mark.start.min(
            self.working_text.len().saturating_sub(1),
        )).1;
        draft.end_mark = Some(end_mark);
        tracing::debug!(draft_id = %draft.draft_id, chars = draft.full_text.len(), "draft closed");
        DraftEvent::end(draft)
    }

    /// Audio (start, end) of the event whose text contains `offset`.
    fn audio_span_at(&self, offset: usize) -> (f64, f64) {
        for span in &self.spans {
            if offset < span.end_offset {
                return (span.audio_start, span.audio_end);
            }
        }
        self.spans
            .last()
            .map(|s| (s.audio_start, s.audio_end))
            .unwrap_or((0.0, 0.0))
    }
}

enum Relevant {
    Start,
    End,
}

enum MatchKind {
    Start,
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> DraftAssembler {
        DraftAssembler::new(AssemblerConfig::default())
    }

    fn text_event(text: &str, start: f64, end: f64) -> TextEvent {
        TextEvent::from_text(text, "src", start, end)
    }

    fn drafts_of(events: &[DraftEvent]) -> (usize, usize) {
        let starts = events
            .iter()
            .filter(|e| matches!(e, DraftEvent::Start { .. }))
            .count();
        let ends = events
            .iter()
            .filter(|e| matches!(e, DraftEvent::End { .. }))
            .count();
        (starts, ends)
    }

    #[test]
    fn test_one_draft_across_multiple_events() {
        let mut builder = assembler();

        let mut tstart = 1.0;
        let out = builder.on_text_event(&text_event("Freddy, take", tstart, tstart + 1.0));
        assert!(out.is_empty());

        tstart += 0.5;
        let out = builder.on_text_event(&text_event(" this down", tstart, tstart + 1.0));
        let (starts, ends) = drafts_of(&out);
        assert_eq!((starts, ends), (1, 0));

        tstart += 1.5;
        let out = builder.on_text_event(&text_event(
            " okay here's the text in the body",
            tstart,
            tstart + 1.0,
        ));
        assert!(out.is_empty());

        tstart += 1.0;
        let out = builder.on_text_event(&text_event(" and some more", tstart, tstart + 1.0));
        assert!(out.is_empty());

        tstart += 2.0;
        let tend = tstart + 1.0;
        let out = builder.on_text_event(&text_event("Freddy break break", tstart, tend));
        assert_eq!(out.len(), 1);
        let DraftEvent::End { draft, .. } = &out[0] else {
            panic!("expected DraftEnd");
        };
        assert_eq!(
            draft.full_text.trim(),
            "okay here's the text in the body and some more"
        );
        assert!(draft.start_mark.text.to_lowercase().contains("take"));
        assert_eq!(
            draft.end_mark.as_ref().unwrap().text.to_lowercase(),
            "freddy break break"
        );
        assert!((draft.audio_start_time - 1.0).abs() < 1e-9);
        assert!((draft.audio_end_time - tend).abs() < 1e-9);
    }

    #[test]
    fn test_two_drafts_in_one_event() {
        let mut builder = assembler();
        let text = "Freddy take this down! Here is body one. Freddy break break! \
                    Freddy Take this down. This is body two. Freddy break break.";
        let out = builder.on_text_event(&text_event(text, 1.0, 3.0));

        let (starts, ends) = drafts_of(&out);
        assert_eq!((starts, ends), (2, 2));

        let ends: Vec<&Draft> = out
            .iter()
            .filter_map(|e| match e {
                DraftEvent::End { draft, .. } => Some(draft),
                _ => None,
            })
            .collect();
        assert_eq!(ends[0].full_text.trim(), "Here is body one.");
        assert_eq!(ends[1].full_text.trim(), "This is body two.");
        assert!((ends[0].audio_start_time - 1.0).abs() < 1e-9);
        assert!((ends[1].audio_end_time - 3.0).abs() < 1e-9);
        assert!(builder.current_draft().is_none());
    }

    #[test]
    fn test_three_drafts_last_unclosed() {
        let mut builder = assembler();
        let text = "Freddy take this down and here is some more stuff freddy break break break. \
                    Freddy take this down. Oh good. Freddy Take this down foo bar";
        let out = builder.on_text_event(&text_event(text, 1.0, 6.0));

        let (starts, ends) = drafts_of(&out);
        assert_eq!(starts, 3);
        assert_eq!(ends, 2);

        let closed: Vec<&Draft> = out
            .iter()
            .filter_map(|e| match e {
                DraftEvent::End { draft, .. } => Some(draft),
                _ => None,
            })
            .collect();
        assert_eq!(closed[0].full_text.trim(), "and here is some more stuff");
        assert_eq!(closed[1].full_text.trim(), "Oh good.");
        // The second draft was split by the third start phrase: its end
        // mark is synthesized and empty.
        assert_eq!(closed[1].end_mark.as_ref().unwrap().text, "");

        let last = builder.end_of_input().expect("third draft still open");
        let DraftEvent::End { draft, .. } = last else {
            panic!("expected DraftEnd");
        };
        assert_eq!(draft.full_text.trim(), "foo bar");
        assert_eq!(draft.end_mark.as_ref().unwrap().text, "");
        assert!((draft.audio_start_time - 1.0).abs() < 1e-9);
        assert!((draft.audio_end_time - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_dictation_with_alternate_start_phrase() {
        let mut builder = assembler();
        let text = "Freddy new draft. This is a long text to make sure that it works. \
Four score and seven years ago our fathers brought forth on this continent, a new nation, \
conceived in Liberty, and dedicated to the proposition that all men are created equal. \
It is altogether fitting and proper that we should do this. Freddy break break. \
Freddy Take this down. But, in a larger sense, we can not dedicate this ground. \
The world will little note, nor long remember what we say here. Freddy break break";
        let out = builder.on_text_event(&text_event(text, 1.0, 61.0));

        let (starts, ends) = drafts_of(&out);
        assert_eq!((starts, ends), (2, 2));

        let closed: Vec<&Draft> = out
            .iter()
            .filter_map(|e| match e {
                DraftEvent::End { draft, .. } => Some(draft),
                _ => None,
            })
            .collect();
        assert!(closed[0].full_text.trim().ends_with("we should do this."));
        assert!(closed[1]
            .full_text
            .trim()
            .starts_with("But, in a larger sense"));
    }

    #[test]
    fn test_parent_draft_chains_chronologically() {
        let mut builder = assembler();
        let text = "Freddy take this down. One. Freddy break break. \
                    Freddy take this down. Two. Freddy break break.";
        let out = builder.on_text_event(&text_event(text, 0.0, 4.0));

        let starts: Vec<&Draft> = out
            .iter()
            .filter_map(|e| match e {
                DraftEvent::Start { draft, .. } => Some(draft),
                _ => None,
            })
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(starts[0].parent_draft_id.is_none());
        assert_eq!(starts[1].parent_draft_id, Some(starts[0].draft_id));
    }

    #[test]
    fn test_draft_start_precedes_draft_end() {
        let mut builder = assembler();
        let text = "Freddy take this down. Body. Freddy break break.";
        let out = builder.on_text_event(&text_event(text, 0.0, 2.0));
        assert!(matches!(out[0], DraftEvent::Start { .. }));
        assert!(matches!(out[1], DraftEvent::End { .. }));
        let (DraftEvent::Start { draft: opened, .. }, DraftEvent::End { draft: closed, .. }) =
            (&out[0], &out[1])
        else {
            panic!("unexpected event order");
        };
        assert_eq!(opened.draft_id, closed.draft_id);
    }

    #[test]
    fn test_replay_is_idempotent_modulo_ids() {
        let events = vec![
            text_event("Freddy take this down first body", 0.0, 1.0),
            text_event(" continues Freddy break break", 1.0, 2.0),
            text_event(" Freddy new draft second body", 2.0, 3.0),
        ];

        let run = |events: &[TextEvent]| {
            let mut builder = assembler();
            let mut all = Vec::new();
            for event in events {
                all.extend(builder.on_text_event(event));
            }
            all.extend(builder.end_of_input());
            all.iter()
                .map(|e| match e {
                    DraftEvent::Start { draft, .. } => ("start", draft.full_text.clone()),
                    DraftEvent::End { draft, .. } => ("end", draft.full_text.clone()),
                    DraftEvent::Rescan { .. } => ("rescan", String::new()),
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(run(&events), run(&events));
    }

    #[test]
    fn test_open_draft_text_grows_at_tail() {
        let mut builder = assembler();
        builder.on_text_event(&text_event("Freddy take this down alpha", 0.0, 1.0));
        let first = builder.current_draft().unwrap().full_text.clone();
        assert_eq!(first, "alpha");

        builder.on_text_event(&text_event(" beta", 1.0, 2.0));
        let second = builder.current_draft().unwrap().full_text.clone();
        assert_eq!(second, "alpha beta");
        assert!(second.starts_with(&first));
    }

    #[test]
    fn test_end_of_input_without_open_draft() {
        let mut builder = assembler();
        builder.on_text_event(&text_event("no commands here", 0.0, 1.0));
        assert!(builder.end_of_input().is_none());
    }
}
