use crate::controlflow::{BlockId, Edge};
use crate::dataflow::{Dataflow, DataflowAnalysis, FlowDirection};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::typequal::base::{is_identity_function, summary_key, QualifierBase};
use crate::typequal::flowvalue::values_conflict;
use crate::typequal::forward::ForwardTypeQualifierDataflow;
use crate::typequal::sourcesink::{SourceSinkInfo, SourceSinkKind};
use crate::typequal::value::{TypeQualifierValue, When};
use crate::typequal::valueset::TypeQualifierValueSet;
use crate::vna::{ValueNumber, ValueNumberDataflow};
use jf_bytecode::code::LabeledInstr;
use jf_bytecode::instrs::{Instr, InvokeKind};
use jf_bytecode::refs::{FieldRef, MethodRef};
use jf_bytecode::Addr;
use std::collections::BTreeSet;

pub type BackwardTypeQualifierDataflow<'a, 'f> = Dataflow<'a, BackwardTypeQualifierAnalysis<'a, 'f>>;

/// Backward propagation of the qualification required on values, from the
/// places where they are consumed (sinks).
///
/// When the forward analysis of the same qualifier is available, values
/// whose required qualification conflicts with the known one are pruned
/// as the requirements flow back, so that a conflict is only reported
/// where the value is consumed.
#[derive(Debug)]
pub struct BackwardTypeQualifierAnalysis<'a, 'f> {
    base: QualifierBase<'a>,
    forward: Option<&'f ForwardTypeQualifierDataflow<'a>>,
}

impl<'a, 'f> BackwardTypeQualifierAnalysis<'a, 'f> {
    /// Creates the analysis and registers the sinks of the method.
    pub fn new(vna: &'a ValueNumberDataflow<'a>, tqv: TypeQualifierValue) -> AnalysisResult<Self> {
        let mut analysis = Self {
            base: QualifierBase::new(vna, tqv),
            forward: None,
        };
        analysis.register_instruction_sinks()?;
        Ok(analysis)
    }

    /// Enables pruning against the forward facts.
    #[must_use]
    pub fn with_forward(mut self, forward: &'f ForwardTypeQualifierDataflow<'a>) -> Self {
        self.forward = Some(forward);
        self
    }

    #[inline]
    #[must_use]
    pub fn qualifier(&self) -> &TypeQualifierValue {
        &self.base.tqv
    }

    /// Sinks modeled by the instruction at `addr`.
    #[must_use]
    pub fn sinks_at(&self, addr: Addr) -> Option<&BTreeSet<SourceSinkInfo>> {
        self.base.source_sinks_at(addr)
    }

    pub fn iter_sinks(&self) -> impl Iterator<Item = &SourceSinkInfo> {
        self.base.iter_source_sinks()
    }

    fn register_instruction_sinks(&mut self) -> AnalysisResult<()> {
        let ctx = self.base.ctx();
        let method = self.base.method().clone();
        let return_when = if method.descriptor().returns_void() {
            None
        } else {
            ctx.annotations()
                .return_value(ctx.repo(), &method, &self.base.tqv)
        };
        let cfg = self.base.cfg();
        for (_, block) in cfg.iter_blocks() {
            for linstr in block.instructions() {
                match linstr.instr() {
                    Instr::Return(_) => {
                        let when = return_when.unwrap_or(When::Unknown);
                        self.register_top_of_stack_sink(SourceSinkKind::ReturnValue, linstr.addr(), when)?;
                    }
                    Instr::PutField(field) => self.register_field_store_sink(linstr, field, false)?,
                    Instr::PutStatic(field) => self.register_field_store_sink(linstr, field, true)?,
                    Instr::Invoke(kind, called) => self.register_argument_sinks(linstr, *kind, called)?,
                    _ => (),
                }
            }
        }
        Ok(())
    }

    fn register_top_of_stack_sink(&mut self, kind: SourceSinkKind, addr: Addr, when: When) -> AnalysisResult<()> {
        let frame = self.base.vna.fact_at(addr)?;
        if frame.is_valid() {
            let vn = *frame.top()?;
            self.base.register(SourceSinkInfo::new(kind, addr, vn, when));
        }
        Ok(())
    }

    fn register_field_store_sink(
        &mut self,
        linstr: &LabeledInstr,
        field: &FieldRef,
        is_static: bool,
    ) -> AnalysisResult<()> {
        let ctx = self.base.ctx();
        let field = ctx.repo().field_info(field, is_static);
        let when = ctx
            .annotations()
            .field(&field, &self.base.tqv)
            .unwrap_or(When::Unknown);
        self.register_top_of_stack_sink(SourceSinkKind::FieldStore, linstr.addr(), when)
    }

    fn register_argument_sinks(
        &mut self,
        linstr: &LabeledInstr,
        kind: InvokeKind,
        called: &MethodRef,
    ) -> AnalysisResult<()> {
        let nparams = called.descriptor.params.len();
        if nparams == 0 || is_identity_function(kind, called) {
            return Ok(());
        }
        let frame = self.base.vna.fact_at(linstr.addr())?;
        if !frame.is_valid() {
            return Ok(());
        }
        let ctx = self.base.ctx();
        let repo = ctx.repo();
        let key = summary_key(repo, called);
        for param in 0..nparams {
            let tqv = &self.base.tqv;
            let (when, interproc) = match ctx.annotations().called_parameter(repo, called, param, tqv) {
                Some(when) => (when, false),
                None => match ctx.interproc().parameter(&key, param, tqv) {
                    Some(when) => (when, true),
                    None => (When::Unknown, false),
                },
            };
            let vn = frame.argument_value(&called.descriptor, param)?;
            let info = SourceSinkInfo::new(SourceSinkKind::ArgumentToCalledMethod, linstr.addr(), vn, when)
                .with_parameter(param)
                .with_interproc(interproc);
            self.base.register(info);
        }
        Ok(())
    }

    // Drops the requirements on values whose forward qualification
    // conflicts with them.
    fn prune_conflicting_values(&self, fact: &mut TypeQualifierValueSet, forward_fact: &TypeQualifierValueSet) {
        if !forward_fact.is_valid() || !fact.is_valid() {
            return;
        }
        let strict = self.base.tqv.strict;
        let conflicting: Vec<ValueNumber> = fact
            .value_numbers()
            .filter(|vn| values_conflict(strict, forward_fact.value(*vn), fact.value(*vn)))
            .collect();
        for vn in conflicting {
            log::trace!("pruning conflicting value {vn}");
            fact.prune_value(vn);
        }
    }

    fn pruning_forward(&self) -> Option<&'f ForwardTypeQualifierDataflow<'a>> {
        if self.base.ctx().options().prune_conflicting_values {
            self.forward
        } else {
            None
        }
    }
}

impl<'a, 'f> DataflowAnalysis for BackwardTypeQualifierAnalysis<'a, 'f> {
    type Fact = TypeQualifierValueSet;
    type Error = AnalysisError;

    const DIRECTION: FlowDirection = FlowDirection::Backward;

    fn create_fact(&self) -> Self::Fact {
        TypeQualifierValueSet::new()
    }

    fn init_entry_fact(&mut self, fact: &mut Self::Fact) -> AnalysisResult<()> {
        fact.make_valid();
        Ok(())
    }

    fn make_fact_top(&self, fact: &mut Self::Fact) {
        fact.set_top();
    }

    fn is_top(&self, fact: &Self::Fact) -> bool {
        fact.is_top()
    }

    fn same(&self, fact1: &Self::Fact, fact2: &Self::Fact) -> bool {
        fact1.same_as(fact2)
    }

    fn meet_into(&mut self, fact: &Self::Fact, _edge: &Edge, result: &mut Self::Fact) -> AnalysisResult<()> {
        QualifierBase::meet_into(fact, result)
    }

    fn edge_transfer(&self, edge: &Edge, fact: &mut Self::Fact) -> AnalysisResult<()> {
        if let Some(forward) = self.pruning_forward() {
            let forward_fact = forward.fact_on_edge(edge)?;
            self.prune_conflicting_values(fact, &forward_fact);
        }
        self.base.propagate_phis(edge, fact, false)
    }

    fn transfer_instr(
        &mut self,
        _block: BlockId,
        linstr: &LabeledInstr,
        fact: &mut Self::Fact,
    ) -> AnalysisResult<()> {
        if !fact.is_valid() {
            return Ok(());
        }
        if let Some(forward) = self.pruning_forward() {
            let forward_fact = forward.fact_after(linstr.addr())?;
            self.prune_conflicting_values(fact, forward_fact);
        }
        self.base.transfer(linstr, fact, false)
    }
}

/// Runs the backward type qualifier analysis of a method, pruned against
/// the forward analysis when one is given.
pub fn compute_backward<'a, 'f>(
    vna: &'a ValueNumberDataflow<'a>,
    forward: Option<&'f ForwardTypeQualifierDataflow<'a>>,
    tqv: &TypeQualifierValue,
) -> AnalysisResult<BackwardTypeQualifierDataflow<'a, 'f>> {
    let mut analysis = BackwardTypeQualifierAnalysis::new(vna, tqv.clone())?;
    if let Some(forward) = forward {
        analysis = analysis.with_forward(forward);
    }
    let method = analysis.base.method().to_string();
    log::debug!("backward {tqv} analysis of {method}");
    let max_iterations = analysis.base.ctx().options().max_iterations;
    Dataflow::execute(vna.cfg(), analysis, &method, max_iterations)
}
