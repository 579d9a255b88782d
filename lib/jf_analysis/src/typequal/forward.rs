use crate::controlflow::{BlockId, Edge};
use crate::dataflow::{Dataflow, DataflowAnalysis, FlowDirection};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::typequal::base::{is_identity_function, QualifierBase};
use crate::typequal::sourcesink::{SourceSinkInfo, SourceSinkKind};
use crate::typequal::value::{TypeQualifierValue, When};
use crate::typequal::valueset::TypeQualifierValueSet;
use crate::vna::ValueNumberDataflow;
use jf_bytecode::code::LabeledInstr;
use jf_bytecode::instrs::{Constant, Instr, InvokeKind};
use jf_bytecode::refs::{FieldRef, MethodRef};
use jf_bytecode::Addr;
use std::collections::BTreeSet;

pub type ForwardTypeQualifierDataflow<'a> = Dataflow<'a, ForwardTypeQualifierAnalysis<'a>>;

/// Forward propagation of the qualification of values from the places
/// where they are produced (sources).
#[derive(Debug)]
pub struct ForwardTypeQualifierAnalysis<'a> {
    base: QualifierBase<'a>,
    parameter_sources: Vec<SourceSinkInfo>,
}

impl<'a> ForwardTypeQualifierAnalysis<'a> {
    /// Creates the analysis and registers the sources of the method.
    pub fn new(vna: &'a ValueNumberDataflow<'a>, tqv: TypeQualifierValue) -> AnalysisResult<Self> {
        let mut analysis = Self {
            base: QualifierBase::new(vna, tqv),
            parameter_sources: Vec::new(),
        };
        analysis.register_parameter_sources()?;
        analysis.register_instruction_sources()?;
        Ok(analysis)
    }

    #[inline]
    #[must_use]
    pub fn qualifier(&self) -> &TypeQualifierValue {
        &self.base.tqv
    }

    /// Sources modeled at the method entry.
    #[must_use]
    pub fn parameter_sources(&self) -> &[SourceSinkInfo] {
        &self.parameter_sources
    }

    /// Sources modeled by the instruction at `addr`.
    #[must_use]
    pub fn sources_at(&self, addr: Addr) -> Option<&BTreeSet<SourceSinkInfo>> {
        self.base.source_sinks_at(addr)
    }

    pub fn iter_sources(&self) -> impl Iterator<Item = &SourceSinkInfo> {
        self.parameter_sources.iter().chain(self.base.iter_source_sinks())
    }

    fn register_parameter_sources(&mut self) -> AnalysisResult<()> {
        let ctx = self.base.ctx();
        let method = self.base.method().clone();
        let vna = self.base.vna.analysis();
        for param in 0..method.parameters_types().len() {
            let local = method
                .descriptor()
                .param_slot(param, method.is_static())
                .ok_or_else(|| AnalysisError::Internal(format!("no slot for parameter {param} of {method}")))?;
            let vn = vna
                .entry_value(local)
                .ok_or_else(|| AnalysisError::Internal(format!("no entry value for local {local} of {method}")))?;
            let when = ctx
                .annotations()
                .parameter(ctx.repo(), &method, param, &self.base.tqv)
                .unwrap_or(When::Unknown);
            let info = SourceSinkInfo::new(SourceSinkKind::Parameter, Addr::entry(), vn, when)
                .with_parameter_and_local(param, local);
            log::trace!("registering {info}");
            self.parameter_sources.push(info);
        }
        Ok(())
    }

    fn register_instruction_sources(&mut self) -> AnalysisResult<()> {
        let cfg = self.base.cfg();
        for (_, block) in cfg.iter_blocks() {
            for linstr in block.instructions() {
                match linstr.instr() {
                    Instr::Invoke(kind, called) => self.register_return_value_source(linstr, *kind, called)?,
                    Instr::GetField(field) => self.register_field_load_source(linstr, field, false)?,
                    Instr::GetStatic(field) => self.register_field_load_source(linstr, field, true)?,
                    Instr::Const(constant) => self.register_constant_source(linstr, constant)?,
                    Instr::Load(_, _) | Instr::CheckCast(_) | Instr::Stack(_) => (),
                    instr if matches!(instr.produced(), 1 | 2) => {
                        self.register_top_of_stack_source(SourceSinkKind::Other, linstr.addr(), When::Unknown, |i| i)?;
                    }
                    _ => (),
                }
            }
        }
        Ok(())
    }

    fn register_return_value_source(
        &mut self,
        linstr: &LabeledInstr,
        kind: InvokeKind,
        called: &MethodRef,
    ) -> AnalysisResult<()> {
        if called.descriptor.returns_void() || is_identity_function(kind, called) {
            return Ok(());
        }
        let ctx = self.base.ctx();
        let repo = ctx.repo();
        let resolved = match repo.resolve_method(&called.class, &called.name, &called.descriptor) {
            Ok(m) => m,
            Err(err) if err.is_unresolved() => return Ok(()),
            Err(err) => return Err(err),
        };
        let tqv = &self.base.tqv;
        let (when, interproc) = match ctx.annotations().return_value(repo, &resolved, tqv) {
            Some(when) => (when, false),
            None => match ctx.interproc().return_value(resolved.key(), tqv) {
                Some(when) => (when, true),
                None => (When::Unknown, false),
            },
        };
        self.register_top_of_stack_source(
            SourceSinkKind::ReturnValueOfCalledMethod,
            linstr.addr(),
            when,
            |info| info.with_interproc(interproc),
        )
    }

    fn register_field_load_source(
        &mut self,
        linstr: &LabeledInstr,
        field: &FieldRef,
        is_static: bool,
    ) -> AnalysisResult<()> {
        let ctx = self.base.ctx();
        let field = ctx.repo().field_info(field, is_static);
        if !field.resolved {
            return Ok(());
        }
        let when = ctx
            .annotations()
            .field(&field, &self.base.tqv)
            .unwrap_or(When::Unknown);
        self.register_top_of_stack_source(SourceSinkKind::FieldLoad, linstr.addr(), when, |i| i)
    }

    fn register_constant_source(&mut self, linstr: &LabeledInstr, constant: &Constant) -> AnalysisResult<()> {
        let when = match self.base.tqv.validate(constant) {
            Some(when) => when,
            None if self.base.tqv.strict => return Ok(()),
            None => When::Unknown,
        };
        let constant = constant.clone();
        self.register_top_of_stack_source(SourceSinkKind::ConstantValue, linstr.addr(), when, |info| {
            info.with_constant(constant)
        })
    }

    // Values of unknown qualification are only sources for strict
    // qualifiers.
    fn register_top_of_stack_source<F>(
        &mut self,
        kind: SourceSinkKind,
        addr: Addr,
        when: When,
        decorate: F,
    ) -> AnalysisResult<()>
    where
        F: FnOnce(SourceSinkInfo) -> SourceSinkInfo,
    {
        if when == When::Unknown && !self.base.tqv.strict {
            return Ok(());
        }
        let frame = self.base.vna.fact_after(addr)?;
        if frame.is_valid() {
            let vn = *frame.top()?;
            self.base.register(decorate(SourceSinkInfo::new(kind, addr, vn, when)));
        }
        Ok(())
    }
}

impl<'a> DataflowAnalysis for ForwardTypeQualifierAnalysis<'a> {
    type Fact = TypeQualifierValueSet;
    type Error = AnalysisError;

    const DIRECTION: FlowDirection = FlowDirection::Forward;

    fn create_fact(&self) -> Self::Fact {
        TypeQualifierValueSet::new()
    }

    fn init_entry_fact(&mut self, fact: &mut Self::Fact) -> AnalysisResult<()> {
        fact.make_valid();
        for info in &self.parameter_sources {
            fact.model_source_sink(info.clone());
        }
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
        self.base.propagate_phis(edge, fact, true)
    }

    fn transfer_instr(
        &mut self,
        _block: BlockId,
        linstr: &LabeledInstr,
        fact: &mut Self::Fact,
    ) -> AnalysisResult<()> {
        self.base.transfer(linstr, fact, true)
    }
}

/// Runs the forward type qualifier analysis of a method.
pub fn compute_forward<'a>(
    vna: &'a ValueNumberDataflow<'a>,
    tqv: &TypeQualifierValue,
) -> AnalysisResult<ForwardTypeQualifierDataflow<'a>> {
    let analysis = ForwardTypeQualifierAnalysis::new(vna, tqv.clone())?;
    let method = analysis.base.method().to_string();
    log::debug!("forward {tqv} analysis of {method}");
    let max_iterations = analysis.base.ctx().options().max_iterations;
    Dataflow::execute(vna.cfg(), analysis, &method, max_iterations)
}
