//! Fuzzy matching of command phrases against transcribed text.
//!
//! Matching is token-based: both the pattern and the candidate text are
//! lowercased, split on non-alphanumeric runs, and stripped of common filler
//! words, so "Freddy, take this down please" still matches the pattern
//! "Freddy take this down". Scores are the multiset overlap between the
//! pattern tokens and a same-length window of text tokens. For short
//! patterns (three meaningful tokens or fewer) token overlap degenerates, so
//! a normalized Levenshtein similarity over the joined window text assists.

use std::collections::HashMap;

/// Filler words elided from both patterns and candidate text.
const FILLER_WORDS: &[&str] = &[
    "a", "an", "the", "to", "of", "in", "on", "at", "for", "with", "and", "or", "but", "is",
    "are", "was", "were", "be", "been", "please", "um", "uh", "like",
];

/// Pattern length at or below which Levenshtein assists token overlap.
const LEVENSHTEIN_MAX_TOKENS: usize = 3;

fn is_filler(word: &str) -> bool {
    FILLER_WORDS.contains(&word)
}

/// One lowercased word with its byte span in the original text.
#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Split into alphanumeric runs, lowercased, with original byte offsets.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut current = String::new();
    for (idx, ch) in text.char_indices() {
        if ch.is_alphanumeric() {
            if current_start.is_none() {
                current_start = Some(idx);
            }
            current.extend(ch.to_lowercase());
        } else if let Some(start) = current_start.take() {
            tokens.push(Token {
                text: std::mem::take(&mut current),
                start,
                end: idx,
            });
        }
    }
    if let Some(start) = current_start {
        tokens.push(Token {
            text: current,
            start,
            end: text.len(),
        });
    }
    tokens
}

/// Meaningful tokens only: fillers removed.
pub fn meaningful_tokens(text: &str) -> Vec<Token> {
    tokenize(text)
        .into_iter()
        .filter(|t| !is_filler(&t.text))
        .collect()
}

/// A literal multi-word command phrase prepared for matching.
#[derive(Debug, Clone)]
pub struct MatchPattern {
    pub phrase: String,
    tokens: Vec<String>,
    counts: HashMap<String, usize>,
}

impl MatchPattern {
    /// Panics if the phrase has no meaningful words; command phrases are
    /// compiled-in or configured, so this is a programming error.
    pub fn new(phrase: &str) -> Self {
        let tokens: Vec<String> = meaningful_tokens(phrase)
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert!(
            !tokens.is_empty(),
            "command phrase has no meaningful words: {phrase}"
        );
        let mut counts = HashMap::new();
        for token in &tokens {
            *counts.entry(token.clone()).or_insert(0) += 1;
        }
        Self {
            phrase: phrase.to_string(),
            tokens,
            counts,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Score a window of text tokens against this pattern in `[0, 1]`.
    fn score(&self, window: &[Token]) -> f32 {
        let mut window_counts: HashMap<&str, usize> = HashMap::new();
        for token in window {
            *window_counts.entry(token.text.as_str()).or_insert(0) += 1;
        }
        let mut matched = 0usize;
        for (token, &count) in &self.counts {
            matched += count.min(window_counts.get(token.as_str()).copied().unwrap_or(0));
        }
        let overlap = matched as f32 / self.tokens.len() as f32;

        if self.tokens.len() <= LEVENSHTEIN_MAX_TOKENS {
            let joined: String = window
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let target = self.tokens.join(" ");
            overlap.max(levenshtein_similarity(&joined, &target))
        } else {
            overlap
        }
    }
}

/// `1 - distance / max_len`, clamped at zero.
fn levenshtein_similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein(a, b);
    1.0 - distance as f32 / max_len as f32
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// A qualifying match with its span in the original text.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub pattern_index: usize,
    pub score: f32,
    /// Inclusive byte offset of the span start.
    pub start: usize,
    /// Exclusive byte offset; trailing punctuation directly after the last
    /// matched word is absorbed into the span.
    pub end: usize,
}

/// Earliest qualifying match of any pattern over the token stream.
///
/// Tie-breaks: earliest span wins; at the same position the highest score
/// wins, and on equal scores the pattern declared first.
pub fn match_first(
    text: &str,
    tokens: &[Token],
    patterns: &[MatchPattern],
    threshold: f32,
) -> Option<MatchResult> {
    for position in 0..tokens.len() {
        let mut best: Option<MatchResult> = None;
        for (pattern_index, pattern) in patterns.iter().enumerate() {
            let window_end = position + pattern.len();
            if window_end > tokens.len() {
                continue;
            }
            let window = &tokens[position..window_end];
            let score = pattern.score(window);
            if score < threshold {
                continue;
            }
            let better = match &best {
                Some(current) => score > current.score,
                None => true,
            };
            if better {
                best = Some(MatchResult {
                    pattern_index,
                    score,
                    start: window[0].start,
                    end: absorb_punctuation(text, window[window.len() - 1].end),
                });
            }
        }
        if best.is_some() {
            return best;
        }
    }
    None
}

/// Extend a span end over punctuation glued to the last matched word, so
/// "take this down!" consumes the "!" and the draft body starts clean.
fn absorb_punctuation(text: &str, mut end: usize) -> usize {
    for ch in text[end..].chars() {
        if ch.is_alphanumeric() || ch.is_whitespace() {
            break;
        }
        end += ch.len_utf8();
    }
    end
}
