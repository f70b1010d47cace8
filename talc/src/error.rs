use std::fmt;

use crate::{DecodeError, HeapError};

/// One line per activation, innermost first: receiver class and selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextTrace {
    pub frames: Vec<String>,
}

impl fmt::Display for ContextTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(f, "    {frame}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("compile error: {message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Fatal failures. None of these is recoverable inside the interpreter; the
/// process that raised one is aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("{class} does not understand #{selector}\n{trace}")]
    MessageNotUnderstood {
        class: String,
        selector: String,
        trace: ContextTrace,
    },
    #[error("non-local return to a context that already returned\n{trace}")]
    DeadContext { trace: ContextTrace },
    #[error("invalid bytecode at pc {pc}: {source}\n{trace}")]
    InvalidBytecode {
        pc: usize,
        source: DecodeError,
        trace: ContextTrace,
    },
    #[error("allocation failed: {0}")]
    Allocation(#[from] HeapError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("invalid configuration: {0}")]
    Config(&'static str),
}

impl RuntimeError {
    pub fn trace(&self) -> Option<&ContextTrace> {
        match self {
            RuntimeError::MessageNotUnderstood { trace, .. }
            | RuntimeError::DeadContext { trace }
            | RuntimeError::InvalidBytecode { trace, .. } => Some(trace),
            _ => None,
        }
    }
}
