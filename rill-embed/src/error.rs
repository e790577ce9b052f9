// rill-embed - Error types for the embedding API
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Errors surfaced across the host boundary.

use std::fmt;

use rill_vm::{CompileError, RuntimeError};

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Everything that can go wrong loading or running a script.
#[derive(Debug)]
pub enum EmbedError {
    /// Syntax errors, as `line:column: message` strings.
    Parse(Vec<String>),
    /// A structural problem that failed the whole module.
    Compile(CompileError),
    /// A failure raised while executing, with frame and stack context.
    Runtime(RuntimeError),
    /// A call completed normally but returned an error value, and the host
    /// opted into surfacing those as errors.
    ErrorResult(String),
    /// Conversion between host and script values failed.
    Convert(String),
    /// Reading a script file failed.
    Io {
        path: String,
        message: String,
    },
}

impl fmt::Display for EmbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbedError::Parse(errors) => {
                write!(f, "parse errors: ")?;
                for (i, error) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{error}")?;
                }
                Ok(())
            }
            EmbedError::Compile(err) => write!(f, "compile error: {err}"),
            EmbedError::Runtime(err) => write!(f, "{err}"),
            EmbedError::ErrorResult(message) => write!(f, "script returned error: {message}"),
            EmbedError::Convert(message) => write!(f, "conversion error: {message}"),
            EmbedError::Io { path, message } => write!(f, "reading {path}: {message}"),
        }
    }
}

impl std::error::Error for EmbedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EmbedError::Compile(err) => Some(err),
            EmbedError::Runtime(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CompileError> for EmbedError {
    fn from(err: CompileError) -> Self {
        EmbedError::Compile(err)
    }
}

impl From<RuntimeError> for EmbedError {
    fn from(err: RuntimeError) -> Self {
        EmbedError::Runtime(err)
    }
}
