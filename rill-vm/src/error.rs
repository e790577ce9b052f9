// rill-vm - Bytecode compiler and virtual machine for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Runtime error records and the trace hook surface.

use std::fmt;
use std::rc::Rc;

/// One call frame captured for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameTrace {
    /// Function name; empty for anonymous functions.
    pub function: String,
    /// The module's source label.
    pub source: String,
    /// Source line derived from the chunk's line table, 0 when unknown.
    pub line: u32,
    /// Bytecode offset of the last dispatched instruction.
    pub ip: usize,
}

impl fmt::Display for FrameTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if !self.source.is_empty() {
            if self.line > 0 {
                write!(f, "{}:{}", self.source, self.line)?;
            } else {
                write!(f, "{}", self.source)?;
            }
            wrote = true;
        } else if self.line > 0 {
            write!(f, "line {}", self.line)?;
            wrote = true;
        }
        if !self.function.is_empty() {
            if wrote {
                write!(f, " ")?;
            }
            write!(f, "in {}", self.function)?;
        }
        Ok(())
    }
}

/// A structured runtime failure.
///
/// Carries the message, the frame where the error was raised, and the full
/// stack of frames from innermost to outermost at the moment of failure.
/// Every runtime error is also materialised as a script-visible error value
/// by the interpreter.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub frame: FrameTrace,
    pub stack: Vec<FrameTrace>,
    /// Underlying host error text, when a native callee failed.
    pub cause: Option<String>,
}

impl RuntimeError {
    /// An error with no frame context (no execution in flight).
    pub fn bare(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
            frame: FrameTrace::default(),
            stack: Vec::new(),
            cause: None,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.frame.to_string();
        if location.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", location, self.message)
        }
    }
}

impl std::error::Error for RuntimeError {}

/// One instruction dispatch, as observed by the trace hook.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// The opcode byte about to be dispatched.
    pub op: u8,
    pub function: String,
    pub source: String,
    pub line: u32,
    /// Bytecode offset of the instruction.
    pub ip: usize,
}

/// Observer invoked synchronously before every dispatch. Hooks must not
/// mutate interpreter state.
pub type TraceHook = Rc<dyn Fn(&TraceEvent)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_full_context() {
        let err = RuntimeError {
            message: "index out of bounds".into(),
            frame: FrameTrace {
                function: "bad".into(),
                source: "inline".into(),
                line: 1,
                ip: 7,
            },
            stack: Vec::new(),
            cause: None,
        };
        assert_eq!(err.to_string(), "inline:1 in bad: index out of bounds");
    }

    #[test]
    fn test_display_without_context() {
        let err = RuntimeError::bare("global f not found");
        assert_eq!(err.to_string(), "global f not found");
    }

    #[test]
    fn test_display_line_only() {
        let err = RuntimeError {
            message: "boom".into(),
            frame: FrameTrace {
                function: String::new(),
                source: String::new(),
                line: 3,
                ip: 0,
            },
            stack: Vec::new(),
            cause: None,
        };
        assert_eq!(err.to_string(), "line 3: boom");
    }
}
