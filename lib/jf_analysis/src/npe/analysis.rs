use crate::context::AnalysisContext;
use crate::controlflow::{BlockId, Branch, Cfg, Edge};
use crate::dataflow::{Dataflow, DataflowAnalysis, FlowDirection};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::npe::decision::IsNullConditionDecision;
use crate::npe::frame::IsNullValueFrame;
use crate::npe::value::IsNullValue;
use crate::npe::visitor::IsNullValueModelingVisitor;
use crate::typequal::{TypeQualifierValue, When};
use crate::vna::{ValueNumber, ValueNumberDataflow, ValueNumberFrame};
use jf_bytecode::code::LabeledInstr;
use jf_bytecode::instrs::{Cond, Instr};
use jf_bytecode::Addr;
use std::collections::{BTreeMap, BTreeSet};

pub type IsNullValueDataflow<'a> = Dataflow<'a, IsNullValueAnalysis<'a>>;

// Value tested by an `instanceof`, with its nullness before the test.
#[derive(Debug, Clone)]
struct InstanceOfTest {
    value: ValueNumber,
    nullness: IsNullValue,
}

/// Forward analysis of the nullness of the values held by locals and stack
/// slots.
///
/// Null comparisons ending a block refine the compared value on the
/// outgoing branches, and branches that cannot be taken are pruned.
#[derive(Debug)]
pub struct IsNullValueAnalysis<'a> {
    vna: &'a ValueNumberDataflow<'a>,
    cfg: &'a Cfg,
    visitor: IsNullValueModelingVisitor<'a>,
    split_blocks: BTreeSet<BlockId>,
    // `instanceof` tests, by address of the instruction using their result.
    instance_of_tests: BTreeMap<Addr, InstanceOfTest>,
}

impl<'a> IsNullValueAnalysis<'a> {
    #[must_use]
    pub fn new(vna: &'a ValueNumberDataflow<'a>) -> Self {
        let cfg = vna.cfg();
        let split_blocks = cfg
            .iter_blocks()
            .map(|(id, _)| id)
            .filter(|id| {
                cfg.outgoing_edges(*id)
                    .iter()
                    .filter(|edge| !edge.is_exception())
                    .count()
                    > 1
            })
            .collect();
        Self {
            vna,
            cfg,
            visitor: IsNullValueModelingVisitor::new(vna),
            split_blocks,
            instance_of_tests: BTreeMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn vna(&self) -> &'a ValueNumberDataflow<'a> {
        self.vna
    }

    fn ctx(&self) -> &'a AnalysisContext<'a> {
        self.vna.analysis().context()
    }

    // Decision of the conditional branch `linstr`, from the frame before
    // the branch.
    fn condition_decision(
        &self,
        linstr: &LabeledInstr,
        frame: &IsNullValueFrame,
    ) -> AnalysisResult<Option<IsNullConditionDecision>> {
        let vna_at = self.vna.fact_at(linstr.addr())?;
        if !vna_at.is_valid() {
            return Ok(None);
        }
        let decision = match linstr.instr() {
            Instr::IfNull(_) | Instr::IfNonNull(_) => {
                let ifnull = matches!(linstr.instr(), Instr::IfNull(_));
                Some(IsNullConditionDecision::for_null_check(
                    frame.top()?,
                    *vna_at.top()?,
                    ifnull,
                ))
            }
            Instr::IfAcmpEq(_) | Instr::IfAcmpNe(_) => {
                let cmpeq = matches!(linstr.instr(), Instr::IfAcmpEq(_));
                IsNullConditionDecision::for_reference_comparison(
                    (frame.stack_value(1)?, *vna_at.stack_value(1)?),
                    (frame.top()?, *vna_at.top()?),
                    cmpeq,
                )
            }
            // Only reached from the `instanceof` block.
            Instr::If(cond @ (Cond::Eq | Cond::Ne), _) if self.has_single_predecessor(linstr.addr()) => self
                .instance_of_tests
                .get(&linstr.addr())
                .and_then(|test| IsNullConditionDecision::for_instance_of(&test.nullness, test.value, *cond == Cond::Eq)),
            _ => None,
        };
        Ok(decision)
    }

    fn has_single_predecessor(&self, addr: Addr) -> bool {
        self.cfg
            .block_of(addr)
            .map_or(false, |id| self.cfg.incoming_edges(id).len() == 1)
    }

    // Gives the decided nullness to the tested value on a branch edge.
    fn apply_decision(
        &self,
        decision: &IsNullConditionDecision,
        branch: &Branch,
        vna_result: &ValueNumberFrame,
        fact: &mut IsNullValueFrame,
    ) {
        let (Some(vn), Some(value)) = (decision.value(), decision.decision(branch)) else {
            return;
        };
        if !vna_result.is_valid() {
            return;
        }
        log::trace!("value {vn} is {value} on {branch:?} branch");
        fact.set_slots_holding(vna_result, vn, value);
        if fact.known_value(vn).is_some() || vna_result.load_of(vn).is_some() {
            fact.set_known_value(vn, value.clone());
        }
    }

    // Known values of loads merged into a phi at the target block follow
    // the phi.
    fn rename_known_values(&self, edge: &Edge, fact: &mut IsNullValueFrame) -> AnalysisResult<()> {
        if fact.iter_known_values().next().is_none() {
            return Ok(());
        }
        let source = self.vna.fact_on_edge(edge)?;
        let target = self.vna.start_fact(edge.target)?;
        if !source.is_valid() || !target.is_valid() {
            return Ok(());
        }
        let renamed: Vec<(ValueNumber, ValueNumber)> = fact
            .iter_known_values()
            .filter_map(|(vn, _)| {
                let load = source.load_of(*vn)?;
                let new = target.available_load(load)?.first()?;
                Some((*vn, *new))
            })
            .collect();
        for (old, new) in renamed {
            fact.use_new_value_number_for_load(old, new);
        }
        Ok(())
    }

    fn parameter_value(&self, param: usize) -> Option<IsNullValue> {
        let ctx = self.ctx();
        let method = self.vna.analysis().method();
        let tqv = TypeQualifierValue::nonnull();
        let when = ctx
            .annotations()
            .parameter(ctx.repo(), method, param, &tqv)
            .or_else(|| ctx.interproc().parameter(method.key(), param, &tqv))?;
        match when {
            When::Maybe => Some(IsNullValue::parameter_might_be_null(param)),
            When::Always => Some(IsNullValue::parameter_non_null(param)),
            When::Never | When::Unknown => None,
        }
    }
}

impl<'a> DataflowAnalysis for IsNullValueAnalysis<'a> {
    type Fact = IsNullValueFrame;
    type Error = AnalysisError;

    const DIRECTION: FlowDirection = FlowDirection::Forward;

    fn create_fact(&self) -> Self::Fact {
        IsNullValueFrame::new(self.vna.analysis().num_locals())
    }

    fn init_entry_fact(&mut self, fact: &mut Self::Fact) -> AnalysisResult<()> {
        let method = self.vna.analysis().method();
        let mut locals = vec![IsNullValue::non_reporting_non_null(); self.vna.analysis().num_locals()];
        if !method.is_static() {
            if let Some(this) = locals.first_mut() {
                *this = IsNullValue::non_null();
            }
        }
        for (param, typ) in method.parameters_types().iter().enumerate() {
            if !typ.is_reference() {
                continue;
            }
            let slot = method.descriptor().param_slot(param, method.is_static());
            if let (Some(slot), Some(value)) = (slot, self.parameter_value(param)) {
                if let Some(local) = locals.get_mut(slot) {
                    *local = value;
                }
            }
        }
        fact.set_top();
        fact.set_valid(locals);
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
        if fact.is_top() || result.is_bottom() {
            return Ok(());
        }
        if result.is_top() {
            *result = fact.clone();
            result.set_decision(None);
            return Ok(());
        }
        if fact.is_bottom() {
            result.set_bottom();
            return Ok(());
        }
        result.merge_with(fact.frame(), |_, mine, theirs| IsNullValue::merge(mine, theirs))?;
        result.merge_known_values_with(fact);
        result.set_decision(None);
        Ok(())
    }

    fn edge_transfer(&self, edge: &Edge, fact: &mut Self::Fact) -> AnalysisResult<()> {
        if !fact.is_valid() {
            return Ok(());
        }
        if edge.is_exception() {
            fact.clear_stack();
            fact.to_exception_values();
            if edge.target != self.cfg.exit() {
                fact.push(IsNullValue::non_null());
            }
            fact.set_decision(None);
            return self.rename_known_values(edge, fact);
        }

        if self.split_blocks.contains(&edge.source) {
            fact.downgrade_on_control_split();
        }
        if let Some(decision) = fact.decision().cloned() {
            if !decision.is_edge_feasible(edge.branch) {
                log::trace!("infeasible edge {} -> {}", edge.source.index(), edge.target.index());
                fact.set_top();
                return Ok(());
            }
            let vna_result = self.vna.result_fact(edge.source)?;
            self.apply_decision(&decision, edge.branch, vna_result, fact);
            fact.set_decision(None);
        }
        if edge.target == self.cfg.exit() {
            fact.clear_stack();
        }
        self.rename_known_values(edge, fact)
    }

    fn transfer_instr(&mut self, block: BlockId, linstr: &LabeledInstr, fact: &mut Self::Fact) -> AnalysisResult<()> {
        if !fact.is_valid() {
            return Ok(());
        }
        let addr = linstr.addr();
        let decision = self.condition_decision(linstr, fact)?;
        if let Instr::InstanceOf(_) = linstr.instr() {
            let vna_at = self.vna.fact_at(addr)?;
            match (vna_at.is_valid(), fact.top()) {
                (true, Ok(nullness)) => {
                    let test = InstanceOfTest {
                        value: *vna_at.top()?,
                        nullness: nullness.clone(),
                    };
                    self.instance_of_tests.insert(linstr.next_addr(), test);
                }
                _ => {
                    self.instance_of_tests.remove(&linstr.next_addr());
                }
            }
        }

        self.visitor.analyze_instruction(linstr, fact)?;
        if !fact.is_valid() {
            return Ok(());
        }
        fact.set_decision(decision);

        let vna_after = self.vna.fact_after(addr)?;
        if vna_after.is_valid() && linstr.instr().produced() == 1 {
            if let (Ok(vn), Ok(value)) = (vna_after.top(), fact.top()) {
                let value = value.clone();
                fact.set_slots_holding(vna_after, *vn, &value);
            }
        }

        let last = self.cfg.block(block).last_instruction().map(LabeledInstr::addr);
        if last == Some(addr) && vna_after.is_valid() && self.ctx().options().redundant_load_elimination {
            fact.clean_stale_knowledge(vna_after);
        }
        Ok(())
    }
}

/// Runs the null value analysis on a method already value numbered.
pub fn compute_null_values<'a>(vna: &'a ValueNumberDataflow<'a>) -> AnalysisResult<IsNullValueDataflow<'a>> {
    let method = vna.analysis().method();
    log::debug!("null value analysis of {method}");
    let analysis = IsNullValueAnalysis::new(vna);
    Dataflow::execute(
        vna.cfg(),
        analysis,
        &method.to_string(),
        vna.analysis().context().options().max_iterations,
    )
}

/// Locations where a value is known to be null: null producing
/// instructions and null comparisons deciding that the tested value is
/// null on one of the branches.
pub fn locations_where_value_becomes_null(df: &IsNullValueDataflow) -> AnalysisResult<BTreeSet<(Addr, ValueNumber)>> {
    let vna = df.analysis().vna();
    let cfg = df.cfg();
    let mut locations = BTreeSet::new();
    for addr in cfg.iter_locations() {
        let after = df.fact_after(addr)?;
        let vna_after = vna.fact_after(addr)?;
        if !after.is_valid() || !vna_after.is_valid() {
            continue;
        }
        let produces = vna
            .analysis()
            .method()
            .code()
            .and_then(|code| code.instruction_at(addr).ok())
            .map_or(false, |linstr| linstr.instr().produced() > 0);
        if !produces {
            continue;
        }
        if let (Ok(value), Ok(vn)) = (after.top(), vna_after.top()) {
            if value.is_definitely_null() {
                locations.insert((addr, *vn));
            }
        }
    }
    for (id, block) in cfg.iter_blocks() {
        let (Some(last), Some(decision)) = (block.last_instruction(), df.result_fact(id)?.decision()) else {
            continue;
        };
        let Some(vn) = decision.value() else {
            continue;
        };
        let becomes_null = [Branch::IfTrue, Branch::IfFalse]
            .iter()
            .filter_map(|branch| decision.decision(branch))
            .any(IsNullValue::is_definitely_null);
        if becomes_null {
            locations.insert((last.addr(), vn));
        }
    }
    Ok(locations)
}
