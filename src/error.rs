//! Crate-wide error taxonomy: distinguishable at the type level, but all
//! collapse to a single human-readable line when shown to a host, prefixed
//! by their kind as required by the error-handling design.

use thiserror::Error;

/// One line with an optional source line number, used by `Error::Parse`'s
/// aggregated list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub line: u32,
    pub message: String,
}

impl std::fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error (line {}): {}", self.line, self.message)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Parsing finished with one or more accumulated errors.
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
    Parse(Vec<ParseIssue>),

    /// A compile-time error: undefined variable, unknown operator. Fails
    /// fast with a single error.
    #[error("Compile error (line {line}): {message}")]
    Compile { line: u32, message: String },

    /// A runtime error raised by the VM: arity mismatch, calling a
    /// non-function, arithmetic type mismatch, stack overflow, and so on.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// An in-language `Error` value produced by a built-in or by the
    /// tree-walking evaluator for a type mismatch.
    #[error("Error: {0}")]
    Language(String),
}

impl Error {
    pub fn compile(line: u32, message: impl Into<String>) -> Self {
        Error::Compile {
            line,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    pub fn language(message: impl Into<String>) -> Self {
        Error::Language(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
