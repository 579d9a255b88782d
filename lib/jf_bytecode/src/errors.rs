//! Bytecode errors definitions.

use crate::Addr;
use thiserror::Error;

/// An alias for result that can be a [`BytecodeError`].
pub type BytecodeResult<T> = Result<T, BytecodeError>;

/// The bytecode error type.
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Custom internal error type.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("could not convert {} into {}", from, to)]
    Conversion { from: String, to: String },

    #[error("invalid type")]
    InvalidType,

    #[error("Instruction not found (address: {0})")]
    InstructionNotFound(Addr),

    #[error("branch target out of code (address: {0})")]
    BadTarget(Addr),

    #[error("invalid exception handler: {0}")]
    BadHandler(String),

    #[error("method body is empty")]
    EmptyCode,
}
