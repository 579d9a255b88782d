//! Can a program point still reach a normal return of its method?
//!
//! Used to tell apart locations only leading to an exception, where
//! diagnostics are usually not worth reporting.

use crate::config::AnalysisOptions;
use crate::controlflow::{BlockId, Cfg, Edge};
use crate::dataflow::{Dataflow, DataflowAnalysis, FlowDirection};
use crate::errors::{AnalysisError, AnalysisResult};
use jf_bytecode::code::LabeledInstr;
use std::fmt;

/// TOP, or whether a normal return is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReturnPathType {
    can_return_normally: Option<bool>,
}

impl ReturnPathType {
    #[inline]
    #[must_use]
    pub const fn top() -> Self {
        Self {
            can_return_normally: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn new(can_return_normally: bool) -> Self {
        Self {
            can_return_normally: Some(can_return_normally),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_top(&self) -> bool {
        self.can_return_normally.is_none()
    }

    pub fn set_top(&mut self) {
        self.can_return_normally = None;
    }

    /// TOP facts answer true.
    #[must_use]
    pub fn can_return_normally(&self) -> bool {
        self.can_return_normally.unwrap_or(true)
    }

    pub fn set_can_return_normally(&mut self, can_return_normally: bool) {
        self.can_return_normally = Some(can_return_normally);
    }

    /// A point can return normally if one of its successors can.
    pub fn merge_with(&mut self, other: &Self) {
        self.can_return_normally = match (self.can_return_normally, other.can_return_normally) {
            (None, theirs) => theirs,
            (mine, None) => mine,
            (Some(mine), Some(theirs)) => Some(mine || theirs),
        };
    }
}

impl fmt::Display for ReturnPathType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.can_return_normally {
            None => write!(f, "TOP"),
            Some(true) => write!(f, "can return normally"),
            Some(false) => write!(f, "cannot return normally"),
        }
    }
}

pub type ReturnPathTypeDataflow<'a> = Dataflow<'a, ReturnPathTypeAnalysis<'a>>;

#[derive(Debug)]
pub struct ReturnPathTypeAnalysis<'a> {
    cfg: &'a Cfg,
}

impl<'a> ReturnPathTypeAnalysis<'a> {
    #[must_use]
    pub const fn new(cfg: &'a Cfg) -> Self {
        Self { cfg }
    }
}

impl<'a> DataflowAnalysis for ReturnPathTypeAnalysis<'a> {
    type Fact = ReturnPathType;
    type Error = AnalysisError;

    const DIRECTION: FlowDirection = FlowDirection::Backward;

    fn create_fact(&self) -> Self::Fact {
        ReturnPathType::top()
    }

    fn init_entry_fact(&mut self, fact: &mut Self::Fact) -> AnalysisResult<()> {
        fact.set_can_return_normally(true);
        Ok(())
    }

    fn make_fact_top(&self, fact: &mut Self::Fact) {
        fact.set_top();
    }

    fn is_top(&self, fact: &Self::Fact) -> bool {
        fact.is_top()
    }

    fn same(&self, fact1: &Self::Fact, fact2: &Self::Fact) -> bool {
        fact1 == fact2
    }

    fn meet_into(&mut self, fact: &Self::Fact, _edge: &Edge, result: &mut Self::Fact) -> AnalysisResult<()> {
        result.merge_with(fact);
        Ok(())
    }

    // Leaving the method through an exception is not a normal return.
    fn edge_transfer(&self, edge: &Edge, fact: &mut Self::Fact) -> AnalysisResult<()> {
        if edge.target == self.cfg.exit() {
            fact.set_can_return_normally(!edge.is_exception());
        }
        Ok(())
    }

    fn transfer_instr(&mut self, _block: BlockId, _linstr: &LabeledInstr, _fact: &mut Self::Fact) -> AnalysisResult<()> {
        Ok(())
    }
}

/// Runs the return path analysis on a method CFG.
pub fn compute_return_paths<'a>(
    cfg: &'a Cfg,
    method: &str,
    options: &AnalysisOptions,
) -> AnalysisResult<ReturnPathTypeDataflow<'a>> {
    log::debug!("return path analysis of {method}");
    Dataflow::execute(cfg, ReturnPathTypeAnalysis::new(cfg), method, options.max_iterations)
}

/// Can the method return normally at all?
pub fn method_can_return_normally(df: &ReturnPathTypeDataflow) -> AnalysisResult<bool> {
    Ok(df.result_fact(df.cfg().entry())?.can_return_normally())
}
