//! Typed errors for caller misuse and capability failures.
//!
//! Malformed patch input is never an error here: the parser logs and skips
//! the offending unit. These types cover the cases that abort an operation.

use thiserror::Error;

/// Failures of [`crate::diff::resolve_hunk`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("hunk index {index} out of range for {name} ({len} hunks)")]
    HunkOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },
    #[error("{name} has no full file contents; accept/reject is unavailable")]
    MissingContents { name: String },
    #[error("contents of {name} do not cover lines {start}..{end} on the {side} side")]
    ContentsOutOfSync {
        name: String,
        side: &'static str,
        start: usize,
        end: usize,
    },
}

/// Failures of the streaming renderer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The tokenizer asked to retract more tokens than the current line holds.
    #[error("recall of {requested} tokens exceeds {buffered} buffered on the current line")]
    RecallOverflow { requested: usize, buffered: usize },
    #[error("stream is closed")]
    Closed,
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
}

/// Failures of a tokenizer capability.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum TokenizeError {
    #[error("unknown language: {0}")]
    UnknownLanguage(String),
    #[error("unknown theme: {0}")]
    UnknownTheme(String),
    #[error("tokenizer failed: {0}")]
    Failed(String),
}

/// Failures surfaced to scheduler callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    /// The scheduler was disposed before the request completed.
    #[error("scheduler has been disposed")]
    Disposed,
}
