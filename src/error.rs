// This module defines the error types of the cases generator using the thiserror crate.
// CasesError is the single error enum returned by every public entry point: syntax errors
// raised while lexing and parsing the definitions region, structural analysis errors
// (duplicate or unknown names, malformed effects, incompatible exit constructs), stack
// consistency errors found while composing macro parts, missing abstract overrides and I/O
// failures of the driver. Each variant carries the offending declaration name and, where
// known, the source location so the message can be surfaced verbatim to the user.

//! Error types for the cases generator.

use std::fmt;
use thiserror::Error;

use crate::stack::StackError;

/// Position of a token or declaration in one of the input files.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub file: String,
    /// 1-based line number.
    pub line: usize,
    /// 0-based column.
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self { file: file.into(), line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Main error type for generation runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CasesError {
    #[error("{location}: syntax error: {message}")]
    Syntax {
        location: SourceLocation,
        message: String,
    },

    #[error("{location}: {name}: {message}")]
    Analysis {
        name: String,
        location: SourceLocation,
        message: String,
    },

    #[error("{location}: {name}: {source}")]
    Stack {
        name: String,
        location: SourceLocation,
        #[source]
        source: StackError,
    },

    #[error("All abstract uops must be overridden by matching base uops; missing overrides: [{}]; overrides without a base uop: [{}]", .missing.join(", "), .orphans.join(", "))]
    MissingOverrides {
        missing: Vec<String>,
        orphans: Vec<String>,
    },

    #[error("{path}: {message}")]
    Io {
        path: String,
        message: String,
    },
}

impl CasesError {
    pub(crate) fn syntax(location: SourceLocation, message: impl Into<String>) -> Self {
        CasesError::Syntax { location, message: message.into() }
    }

    pub(crate) fn analysis(
        name: impl Into<String>,
        location: &SourceLocation,
        message: impl Into<String>,
    ) -> Self {
        CasesError::Analysis {
            name: name.into(),
            location: location.clone(),
            message: message.into(),
        }
    }

    pub(crate) fn stack(name: impl Into<String>, location: &SourceLocation, source: StackError) -> Self {
        CasesError::Stack {
            name: name.into(),
            location: location.clone(),
            source,
        }
    }

    /// Name of the declaration the error is about, if any.
    pub fn declaration(&self) -> Option<&str> {
        match self {
            CasesError::Analysis { name, .. } | CasesError::Stack { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Result type alias for generator operations.
pub type CasesResult<T> = Result<T, CasesError>;
