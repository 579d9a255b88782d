//! Value numbering.
//!
//! Gives every value held in a local or stack slot an identity shared by
//! all the slots known to hold the same value, and tracks the field loads
//! whose values are still valid.

mod analysis;
mod cache;
mod frame;
mod value;

pub use analysis::ValueNumberAnalysis;
pub use cache::ValueNumberCache;
pub use frame::{have_matching_flags, AvailableLoad, ValueNumberFrame};
pub use value::{merge_flags, ValueFlags, ValueNumber, ValueNumberFactory};

use crate::context::AnalysisContext;
use crate::controlflow::Cfg;
use crate::dataflow::Dataflow;
use crate::errors::AnalysisResult;
use crate::repo::Method;

pub type ValueNumberDataflow<'a> = Dataflow<'a, ValueNumberAnalysis<'a>>;

/// Runs value numbering on a method.
pub fn compute_value_numbers<'a>(
    ctx: &'a AnalysisContext<'a>,
    method: &Method<'a>,
    cfg: &'a Cfg,
) -> AnalysisResult<ValueNumberDataflow<'a>> {
    log::debug!("value numbering of {method}");
    let analysis = ValueNumberAnalysis::new(ctx, method.clone(), cfg)?;
    Dataflow::execute(cfg, analysis, &method.to_string(), ctx.options().max_iterations)
}
