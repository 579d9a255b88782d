//! Global error handling.
//!
//! Each sub-crate of the project defines its own type error.
//! Their types can be unified when winding results at the top-level.
//!
//! ```rust
//! use jflow::prelude::*;
//!
//! fn main() -> JfResult<()> { // can return a JfError
//!     let _repo = Repo::from_classes(vec![])?; // can return an AnalysisError
//!     Ok(())
//! }
//! ```

use jf_analysis::errors::AnalysisError;
use jf_bytecode::errors::BytecodeError;
use thiserror::Error;

/// An alias for result that can be a [`JfError`].
pub type JfResult<T> = Result<T, JfError>;

/// The main error type for error winding at the top-level.
/// It mainly consists of transparent wrapper over error types that
/// are defined in dependencies.
#[derive(Debug, Error)]
pub enum JfError {
    /// Custom error for reporting bad run options.
    #[error("bad options: {0}")]
    BadOptions(String),

    /// Error that can be returned from regex compilation.
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// Error that can be returned when building the worker thread pool.
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Error that can be returned from [`jf_analysis`] functions.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Error that can be returned from [`jf_bytecode`] functions.
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}
