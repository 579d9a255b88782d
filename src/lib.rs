//! # `jflow`
//!
//! `jflow` is the main crate of the `jflow` static bug finding project. It
//! provides the inference substrate a checker builds on: a generic dataflow
//! engine, value numbering with available loads, forward and backward type
//! qualifier inference, return path analysis and null value analysis. The
//! project is subdivided into multiple crates, `jflow` acts as entry point
//! by reexporting important structs and functions from those sub-crates.
//! Most of the reexport are done within the `jflow::prelude` namespace.
//!
//! ## Library basics
//!
//! Programs are registered into a `Repo`, which offers class hierarchy
//! queries. Analyses of a method run under an `AnalysisContext` holding
//! the repository, the options and the annotation databases:
//!
//! ```rust
//! use jflow::prelude::*;
//! use jflow::bytecode::classes::{ClassDef, MethodDef, MethodFlags};
//! use jflow::bytecode::code::Code;
//! use jflow::bytecode::instrs::{Constant, Instr, Kind};
//!
//! let code = Code::new(0, vec![Instr::Const(Constant::Null), Instr::Return(Kind::Ref)], vec![])?;
//! let method = MethodDef::new("get", "()Ljava/lang/Object;", MethodFlags::ACC_STATIC, Some(code))?;
//! let repo = Repo::from_classes(vec![ClassDef::new("a/A").with_method(method)])?;
//! let ctx = AnalysisContext::new(&repo, AnalysisOptions::default());
//! let results = run(&ctx, &RunOptions::default(), &[TypeQualifierValue::nonnull()])?;
//! assert_eq!(results.len(), 1);
//! # Ok::<(), JfError>(())
//! ```
//!
//! ## Sub-crates
//!
//!  - [`jf_bytecode`] models the stack machine bytecode the analyses
//!    consume: instructions and their stack effects, types and
//!    descriptors, class definitions and method bodies,
//!  - [`jf_analysis`] contains all the analysis algorithms.

mod errors;
mod runner;

pub use jf_analysis as analysis;
pub use jf_bytecode as bytecode;

/// Reexport module of commonly used structures and functions from `jflow`
/// project sub-crates:
///
/// ```rust
/// use jflow::prelude::*;
/// ```
pub mod prelude {
    pub use crate::errors::{JfError, JfResult};
    pub use crate::runner::{run, RunOptions};

    pub use jf_analysis::config::AnalysisOptions;
    pub use jf_analysis::context::AnalysisContext;
    pub use jf_analysis::controlflow::Cfg;
    pub use jf_analysis::driver::{analyze_method, analyze_methods, AnalysisKind, MethodAnalyses};
    pub use jf_analysis::npe::{compute_null_values, IsNullValue};
    pub use jf_analysis::repo::{Method, MethodKey, Repo};
    pub use jf_analysis::returnpath::compute_return_paths;
    pub use jf_analysis::typequal::{check_method, TypeQualifierValue, Violation, When};
    pub use jf_analysis::vna::compute_value_numbers;

    pub use jf_bytecode::Addr;

    /// Logger settings, usually coming from command line flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct LogOptions {
        pub verbose: bool,
        pub debug: bool,
        pub ecs: bool,
    }

    /// Initializes the global logger from the `JFLOW_LOG` and
    /// `JFLOW_LOG_STYLE` environment variables.
    pub fn init_logger(options: LogOptions) {
        let env = env_logger::Env::new()
            .filter_or("JFLOW_LOG", "info")
            .write_style("JFLOW_LOG_STYLE");

        let mut builder = env_logger::Builder::from_env(env);
        if options.verbose {
            builder.filter_level(log::LevelFilter::Trace);
        } else if options.debug {
            builder.filter_level(log::LevelFilter::Debug);
        }
        if options.ecs {
            builder.format(ecs_logger::format);
        }
        builder.init();
    }
}
