//! Dataflow analysis framework.
//!
//! An analysis implements [`DataflowAnalysis`] and is run to fixpoint over
//! a method CFG with [`Dataflow::execute`]. The result keeps the analysis
//! object together with the converged facts, and answers per-block,
//! per-edge and per-location queries.
//!
//! Facts are named after the direction of the analysis: the *start* fact
//! of a block is where the analysis begins processing the block (its first
//! instruction for forward analyses, its last one for backward analyses)
//! and the *result* fact is where it ends. In the same way, `fact_at` is
//! the fact just before the transfer of an instruction and `fact_after`
//! the fact just after.

use crate::controlflow::{BlockId, Cfg, Edge};
use crate::errors::{AnalysisError, AnalysisResult};
use jf_bytecode::code::LabeledInstr;
use jf_bytecode::Addr;
use std::collections::BTreeMap;
use std::fmt;

mod backward;
mod forward;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    Forward,
    Backward,
}

/// A dataflow analysis: a fact lattice together with its transfer
/// functions.
pub trait DataflowAnalysis {
    type Fact: Clone + fmt::Display;
    type Error;

    const DIRECTION: FlowDirection;

    /// Creates an uninitialized fact.
    fn create_fact(&self) -> Self::Fact;

    /// Sets the fact at the logical entry of the CFG (ENTRY block for
    /// forward analyses, EXIT block for backward ones).
    ///
    /// # Errors
    ///
    /// This method should return a `Self::Error` if the analyzed method does
    /// not allow a proper initialization.
    fn init_entry_fact(&mut self, fact: &mut Self::Fact) -> Result<(), Self::Error>;

    fn make_fact_top(&self, fact: &mut Self::Fact);

    fn is_top(&self, fact: &Self::Fact) -> bool;

    /// Are the two facts equal as far as convergence is concerned?
    fn same(&self, fact1: &Self::Fact, fact2: &Self::Fact) -> bool;

    /// Merges a fact flowing along an edge into the accumulated result.
    ///
    /// # Errors
    ///
    /// This method should return a `Self::Error` if the facts cannot be
    /// merged (for instance invalid facts).
    fn meet_into(
        &mut self,
        fact: &Self::Fact,
        edge: &Edge,
        result: &mut Self::Fact,
    ) -> Result<(), Self::Error>;

    /// Adjusts a fact flowing along an edge, before it is merged.
    ///
    /// # Errors
    ///
    /// This method should return a `Self::Error` if the fact cannot
    /// traverse the edge.
    fn edge_transfer(&self, _edge: &Edge, _fact: &mut Self::Fact) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Called once per block visit, before the first instruction transfer.
    ///
    /// # Errors
    ///
    /// This method should return a `Self::Error` on an invalid fact.
    fn transfer_block_start(
        &mut self,
        _block: BlockId,
        _fact: &mut Self::Fact,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// The instruction transfer function.
    ///
    /// # Errors
    ///
    /// This method should return a `Self::Error` if the instruction cannot
    /// be modeled with the given fact.
    fn transfer_instr(
        &mut self,
        block: BlockId,
        linstr: &LabeledInstr,
        fact: &mut Self::Fact,
    ) -> Result<(), Self::Error>;
}

/// Dataflow analysis result object.
///
/// Contains start and result facts for every basic block, and facts before
/// and after every reachable instruction, after reaching fixpoint.
pub struct Dataflow<'g, A: DataflowAnalysis> {
    cfg: &'g Cfg,
    analysis: A,
    pub(crate) start_facts: BTreeMap<BlockId, A::Fact>,
    pub(crate) result_facts: BTreeMap<BlockId, A::Fact>,
    pub(crate) facts_at: BTreeMap<Addr, A::Fact>,
    pub(crate) facts_after: BTreeMap<Addr, A::Fact>,
    iterations: usize,
}

impl<'g, A> Dataflow<'g, A>
where
    A: DataflowAnalysis,
    A::Error: Into<AnalysisError>,
{
    /// Runs the analysis to fixpoint.
    ///
    /// # Errors
    ///
    /// Errors raised by the analysis are propagated, and
    /// `AnalysisError::NonConvergence` is returned when more than
    /// `max_iterations` passes are needed.
    pub fn execute(
        cfg: &'g Cfg,
        analysis: A,
        method: &str,
        max_iterations: usize,
    ) -> AnalysisResult<Self> {
        let mut df = Self {
            cfg,
            analysis,
            start_facts: BTreeMap::new(),
            result_facts: BTreeMap::new(),
            facts_at: BTreeMap::new(),
            facts_after: BTreeMap::new(),
            iterations: 0,
        };
        for (id, _) in cfg.iter_blocks() {
            let mut fact = df.analysis.create_fact();
            df.analysis.make_fact_top(&mut fact);
            df.start_facts.insert(id, fact.clone());
            df.result_facts.insert(id, fact);
        }

        let order = match A::DIRECTION {
            FlowDirection::Forward => cfg.forward_order(),
            FlowDirection::Backward => cfg.backward_order(),
        };

        loop {
            df.iterations += 1;
            if df.iterations > max_iterations {
                log::warn!("{method}: dataflow analysis did not converge");
                return Err(AnalysisError::NonConvergence {
                    method: method.to_string(),
                    iterations: max_iterations,
                });
            }
            log::debug!("-- pass #{} on {method}", df.iterations);

            let mut changed = false;
            for id in &order {
                let visited = match A::DIRECTION {
                    FlowDirection::Forward => forward::visit_block(&mut df, *id),
                    FlowDirection::Backward => backward::visit_block(&mut df, *id),
                };
                changed |= visited.map_err(A::Error::into)?;
            }
            if !changed {
                break;
            }
        }

        Ok(df)
    }
}

impl<'g, A: DataflowAnalysis> Dataflow<'g, A> {
    // Stores the facts computed for a block and tells whether they changed.
    fn update_block(&mut self, id: BlockId, start: A::Fact, result: A::Fact) -> bool {
        let changed = match (self.start_facts.get(&id), self.result_facts.get(&id)) {
            (Some(old_start), Some(old_result)) => {
                !self.analysis.same(old_start, &start) || !self.analysis.same(old_result, &result)
            }
            _ => true,
        };
        self.start_facts.insert(id, start);
        self.result_facts.insert(id, result);
        changed
    }

    // Applies the transfer function of every instruction in the given
    // order, recording per-location facts.
    fn transfer_instructions<'i, I>(
        &mut self,
        id: BlockId,
        instrs: I,
        fact: &mut A::Fact,
    ) -> Result<(), A::Error>
    where
        I: Iterator<Item = &'i LabeledInstr>,
    {
        if self.analysis.is_top(fact) {
            for linstr in instrs {
                self.facts_at.insert(linstr.addr(), fact.clone());
                self.facts_after.insert(linstr.addr(), fact.clone());
            }
            return Ok(());
        }
        self.analysis.transfer_block_start(id, fact)?;
        for linstr in instrs {
            self.facts_at.insert(linstr.addr(), fact.clone());
            log::trace!("transfer_instr( {} )", linstr);
            log::trace!("    before: {fact}");
            self.analysis.transfer_instr(id, linstr, fact)?;
            log::trace!("    after:  {fact}");
            self.facts_after.insert(linstr.addr(), fact.clone());
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub const fn cfg(&self) -> &'g Cfg {
        self.cfg
    }

    #[inline]
    #[must_use]
    pub const fn analysis(&self) -> &A {
        &self.analysis
    }

    /// Number of passes over the CFG needed to converge.
    #[inline]
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn start_fact(&self, block: BlockId) -> AnalysisResult<&A::Fact> {
        self.start_facts
            .get(&block)
            .ok_or_else(|| AnalysisError::Internal(format!("no fact for block {}", block.index())))
    }

    pub fn result_fact(&self, block: BlockId) -> AnalysisResult<&A::Fact> {
        self.result_facts
            .get(&block)
            .ok_or_else(|| AnalysisError::Internal(format!("no fact for block {}", block.index())))
    }

    /// Fact just before the transfer of the instruction at `addr`.
    pub fn fact_at(&self, addr: Addr) -> AnalysisResult<&A::Fact> {
        self.facts_at
            .get(&addr)
            .ok_or_else(|| AnalysisError::InstructionNotFound(addr.to_string()))
    }

    /// Fact just after the transfer of the instruction at `addr`.
    pub fn fact_after(&self, addr: Addr) -> AnalysisResult<&A::Fact> {
        self.facts_after
            .get(&addr)
            .ok_or_else(|| AnalysisError::InstructionNotFound(addr.to_string()))
    }

    /// Fact flowing along an edge, before being merged into its logical
    /// target.
    pub fn fact_on_edge(&self, edge: &Edge) -> AnalysisResult<A::Fact>
    where
        A::Error: Into<AnalysisError>,
    {
        let source = match A::DIRECTION {
            FlowDirection::Forward if edge.is_exception() => self.start_fact(edge.source)?,
            FlowDirection::Forward => self.result_fact(edge.source)?,
            FlowDirection::Backward => self.result_fact(edge.target)?,
        };
        let mut fact = source.clone();
        self.analysis
            .edge_transfer(edge, &mut fact)
            .map_err(A::Error::into)?;
        Ok(fact)
    }
}

impl<'g, A: DataflowAnalysis> fmt::Debug for Dataflow<'g, A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dataflow")
            .field("blocks", &self.start_facts.len())
            .field("locations", &self.facts_at.len())
            .field("iterations", &self.iterations)
            .finish()
    }
}

fn log_fact<F: fmt::Display>(title: &str, fact: &F) {
    if log::log_enabled!(log::Level::Debug) {
        log::debug!("    -- {title}:");
        for line in format!("{fact}").split('\n') {
            log::debug!("      {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use jf_bytecode::instrs::{Cond, Instr, Kind};

    // Instruction count, TOP when unset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Steps(Option<usize>);

    impl fmt::Display for Steps {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            match self.0 {
                Some(n) => write!(f, "{n}"),
                None => write!(f, "TOP"),
            }
        }
    }

    // Counts the longest path (in instructions) from ENTRY, capped.
    struct Depth;

    impl DataflowAnalysis for Depth {
        type Fact = Steps;
        type Error = AnalysisError;
        const DIRECTION: FlowDirection = FlowDirection::Forward;

        fn create_fact(&self) -> Self::Fact {
            Steps(None)
        }

        fn init_entry_fact(&mut self, fact: &mut Self::Fact) -> AnalysisResult<()> {
            *fact = Steps(Some(0));
            Ok(())
        }

        fn make_fact_top(&self, fact: &mut Self::Fact) {
            *fact = Steps(None);
        }

        fn is_top(&self, fact: &Self::Fact) -> bool {
            fact.0.is_none()
        }

        fn same(&self, fact1: &Self::Fact, fact2: &Self::Fact) -> bool {
            fact1 == fact2
        }

        fn meet_into(&mut self, fact: &Self::Fact, _: &Edge, result: &mut Self::Fact) -> AnalysisResult<()> {
            *result = Steps(match (fact.0, result.0) {
                (None, r) => r,
                (f, None) => f,
                (Some(a), Some(b)) => Some(a.max(b)),
            });
            Ok(())
        }

        fn transfer_instr(&mut self, _: BlockId, _: &LabeledInstr, fact: &mut Self::Fact) -> AnalysisResult<()> {
            *fact = Steps(fact.0.map(|d| (d + 1).min(20)));
            Ok(())
        }
    }

    // Number of instructions that remain to be executed before leaving the
    // method, on the shortest path.
    struct Remaining;

    impl DataflowAnalysis for Remaining {
        type Fact = Steps;
        type Error = AnalysisError;
        const DIRECTION: FlowDirection = FlowDirection::Backward;

        fn create_fact(&self) -> Self::Fact {
            Steps(None)
        }

        fn init_entry_fact(&mut self, fact: &mut Self::Fact) -> AnalysisResult<()> {
            *fact = Steps(Some(0));
            Ok(())
        }

        fn make_fact_top(&self, fact: &mut Self::Fact) {
            *fact = Steps(None);
        }

        fn is_top(&self, fact: &Self::Fact) -> bool {
            fact.0.is_none()
        }

        fn same(&self, fact1: &Self::Fact, fact2: &Self::Fact) -> bool {
            fact1 == fact2
        }

        fn meet_into(&mut self, fact: &Self::Fact, _: &Edge, result: &mut Self::Fact) -> AnalysisResult<()> {
            *result = Steps(match (fact.0, result.0) {
                (None, r) => r,
                (f, None) => f,
                (Some(a), Some(b)) => Some(a.min(b)),
            });
            Ok(())
        }

        fn transfer_instr(&mut self, _: BlockId, _: &LabeledInstr, fact: &mut Self::Fact) -> AnalysisResult<()> {
            *fact = Steps(fact.0.map(|d| d + 1));
            Ok(())
        }
    }

    fn looping_method() -> jf_bytecode::code::Code {
        // 0: iload_1; 1: ifeq 4; 2: iinc 1 -1; 3: goto 0; 4: return
        testing::code(
            2,
            vec![
                Instr::Load(Kind::Int, 1),
                Instr::If(Cond::Eq, Addr(4)),
                Instr::Iinc(1, -1),
                Instr::Goto(Addr(0)),
                Instr::ReturnVoid,
            ],
        )
    }

    #[test]
    fn forward_fixpoint() {
        let code = looping_method();
        let cfg = Cfg::build(&code).unwrap();
        let df = Dataflow::execute(&cfg, Depth, "loop", 100).unwrap();
        assert_eq!(*df.fact_at(Addr(0)).unwrap(), Steps(Some(20)));
        assert_eq!(*df.fact_after(Addr(4)).unwrap(), Steps(Some(20)));
        assert!(df.iterations() > 2);

        let b0 = cfg.block_of(Addr(0)).unwrap();
        let edges = cfg.outgoing_edges(b0);
        assert_eq!(df.fact_on_edge(&edges[0]).unwrap(), Steps(Some(20)));
    }

    #[test]
    fn non_convergence() {
        let code = looping_method();
        let cfg = Cfg::build(&code).unwrap();
        let err = Dataflow::execute(&cfg, Depth, "loop", 3).unwrap_err();
        assert!(matches!(err, AnalysisError::NonConvergence { iterations: 3, .. }));
    }

    #[test]
    fn backward_fixpoint() {
        let code = looping_method();
        let cfg = Cfg::build(&code).unwrap();
        let df = Dataflow::execute(&cfg, Remaining, "loop", 100).unwrap();
        // iload, ifeq, return
        assert_eq!(*df.fact_after(Addr(0)).unwrap(), Steps(Some(3)));
        assert_eq!(*df.fact_at(Addr(0)).unwrap(), Steps(Some(2)));
        assert_eq!(*df.result_fact(cfg.entry()).unwrap(), Steps(Some(3)));
        // iinc, goto, then the loop header
        assert_eq!(*df.fact_after(Addr(2)).unwrap(), Steps(Some(5)));
    }
}
