//! Diagnostics for compile-time errors.
//!
//! Runtime errors are a separate concern (see [`crate::value::RuntimeError`])
//! since they carry a call stack rather than a single source location.

use crate::span::Span;
use std::fmt;

/// Severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "error"),
            DiagnosticLevel::Warning => write!(f, "warning"),
        }
    }
}

/// A single compiler diagnostic tied to a source span.
///
/// The compiler collects these across an entire `compile()` call rather than
/// aborting at the first one, mirroring panic-mode recovery: a parse error
/// leaves `had_error` set but lets the compiler keep scanning for further
/// (independent) mistakes before the caller gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub line: u32,
    pub span: Span,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, line: u32, span: Span) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: message.into(),
            line,
            span,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (line {})", self.level, self.message, self.line)?;
        for note in &self.notes {
            write!(f, "\n  = note: {note}")?;
        }
        Ok(())
    }
}

/// Aggregated failure of a `compile()` call: one or more diagnostics were
/// raised while scanning or parsing the source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("compilation failed with {} error(s)", .0.len())]
pub struct CompileError(pub Vec<Diagnostic>);

impl CompileError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_line_number() {
        let d = Diagnostic::error("Expect ';' after value.", 3, Span::new(10, 11));
        assert_eq!(d.to_string(), "error: Expect ';' after value. (line 3)");
    }

    #[test]
    fn appends_notes() {
        let d = Diagnostic::error("Undefined variable 'x'.", 1, Span::new(0, 1))
            .with_note("did you mean 'y'?");
        assert!(d.to_string().contains("= note: did you mean 'y'?"));
    }
}
