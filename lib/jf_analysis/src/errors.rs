//! Analysis errors definition.

use crate::frame::FrameError;
use jf_bytecode::errors::BytecodeError;
use regex::Error as RegexError;
use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("bytecode error: {0}")]
    Bytecode(#[from] BytecodeError),

    #[error("regex error: {0}")]
    Regex(#[from] RegexError),

    #[error("class not found: {0}")]
    ClassNotFound(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("instruction not found: {0}")]
    InstructionNotFound(String),

    #[error("the method has no implementation")]
    NoCode,

    /// A fact was used in a state that should never occur (for instance
    /// merging an invalid set).
    #[error("invalid dataflow fact: {0}")]
    InvalidFact(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("too many iterations ({iterations}) in dataflow analysis of {method}")]
    NonConvergence { method: String, iterations: usize },
}

impl AnalysisError {
    /// Errors that only mean a referenced class is missing from the
    /// analyzed program, and may be answered with a conservative guess.
    #[must_use]
    pub const fn is_unresolved(&self) -> bool {
        matches!(self, Self::ClassNotFound(_) | Self::MethodNotFound(_))
    }
}
