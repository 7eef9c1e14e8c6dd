//! Command-phrase detection and draft assembly over transcribed text.

mod assembler;
mod matcher;

pub use assembler::{AssemblerConfig, DraftAssembler};
pub use matcher::{match_first, meaningful_tokens, tokenize, MatchPattern, MatchResult, Token};
