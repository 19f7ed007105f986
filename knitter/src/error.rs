use std::fmt;
use std::ops::Range;

use serde::Serialize;
use thiserror::Error;

/// Invalid document or chunk configuration. Always detected before any
/// block executes.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ConfigError {
    pub message: String,
    /// Index of the offending block, if the problem is tied to one.
    pub block: Option<usize>,
    /// Byte span in source.
    pub span: Option<Range<usize>>,
    /// 1-based source line.
    pub line: Option<usize>,
    pub notes: Vec<String>,
}

impl ConfigError {
    /// An error not tied to any source location (e.g. a command-line override).
    pub fn global(message: impl Into<String>) -> Self {
        ConfigError {
            message: message.into(),
            block: None,
            span: None,
            line: None,
            notes: Vec::new(),
        }
    }

    pub fn at(message: impl Into<String>, block: usize, span: Range<usize>, line: usize) -> Self {
        ConfigError {
            message: message.into(),
            block: Some(block),
            span: Some(span),
            line: Some(line),
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Why execution stopped early.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    /// An inline expression or code referenced a binding no earlier block set.
    #[error("unbound reference: '{name}' is not set by any earlier block")]
    UnboundReference { name: String },

    /// The evaluator reported a failure.
    #[error("{message}")]
    Eval { message: String },

    /// The render was cancelled between blocks.
    #[error("render cancelled")]
    Cancelled,
}

/// The failure that halted a render, with the block it happened at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminalError {
    pub block: usize,
    /// 1-based source line of the failure.
    pub line: usize,
    pub span: Range<usize>,
    pub error: ExecutionError,
}

impl fmt::Display for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {} (line {}): {}", self.block, self.line, self.error)
    }
}

impl std::error::Error for TerminalError {}
