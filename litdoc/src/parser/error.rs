use std::fmt;
use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};

/// Parse errors with source location information.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Range<usize>,
    /// 1-based line of `span.start`.
    pub line: usize,
    pub file_id: usize,
    pub notes: Vec<String>,
}

impl ParseError {
    pub fn new(
        message: impl Into<String>,
        span: Range<usize>,
        line: usize,
        file_id: usize,
    ) -> Self {
        ParseError {
            message: message.into(),
            span,
            line,
            file_id,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Convert to a codespan-reporting Diagnostic for display.
    pub fn to_diagnostic(&self) -> Diagnostic<usize> {
        Diagnostic::error()
            .with_message(&self.message)
            .with_labels(vec![Label::primary(self.file_id, self.span.clone())])
            .with_notes(self.notes.clone())
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}
