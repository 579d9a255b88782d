use crate::context::AnalysisContext;
use crate::controlflow::{BlockId, Cfg, Edge};
use crate::dataflow::{DataflowAnalysis, FlowDirection};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::fields::LoadedFieldSet;
use crate::repo::{FieldInfo, Method, MethodKey};
use crate::vna::cache::ValueNumberCache;
use crate::vna::frame::{AvailableLoad, ValueNumberFrame};
use crate::vna::value::{merge_flags, ValueFlags, ValueNumber, ValueNumberFactory};
use jf_bytecode::code::LabeledInstr;
use jf_bytecode::instrs::{Constant, Instr, InvokeKind};
use jf_bytecode::refs::{FieldRef, MethodRef};
use jf_bytecode::types::Type;
use jf_bytecode::Addr;
use std::collections::{BTreeMap, BTreeSet};

/// Forward analysis numbering the values held by locals and stack slots.
///
/// Values that are known to be equal get the same value number: copies
/// through locals and stack operations, redundant field loads, and loads of
/// a field just stored. Slots whose values differ on incoming paths get a
/// phi value, created once per merge point and slot.
#[derive(Debug)]
pub struct ValueNumberAnalysis<'a> {
    ctx: &'a AnalysisContext<'a>,
    method: Method<'a>,
    cfg: &'a Cfg,
    factory: ValueNumberFactory,
    cache: ValueNumberCache,
    entry_values: Vec<ValueNumber>,
    exception_values: BTreeMap<BlockId, ValueNumber>,
    constant_values: BTreeMap<Constant, Vec<ValueNumber>>,
    string_constants: BTreeMap<ValueNumber, String>,
    loaded_fields: LoadedFieldSet,
    merged_slots: BTreeMap<(BlockId, usize), ValueNumber>,
    merged_loads: BTreeMap<(BlockId, AvailableLoad), ValueNumber>,
    phi_inputs: BTreeMap<ValueNumber, BTreeSet<ValueNumber>>,
}

impl<'a> ValueNumberAnalysis<'a> {
    pub fn new(ctx: &'a AnalysisContext<'a>, method: Method<'a>, cfg: &'a Cfg) -> AnalysisResult<Self> {
        let code = method.code().ok_or(AnalysisError::NoCode)?;
        let mut factory = ValueNumberFactory::new();
        let entry_values = (0..code.max_locals())
            .map(|_| factory.create_fresh_value(ValueFlags::empty()))
            .collect();
        let exception_values = cfg
            .iter_blocks()
            .filter(|(_, block)| block.is_exception_handler())
            .map(|(id, _)| (id, factory.create_fresh_value(ValueFlags::empty())))
            .collect();
        let loaded_fields = LoadedFieldSet::compute(ctx.repo(), code);
        Ok(Self {
            ctx,
            method,
            cfg,
            factory,
            cache: ValueNumberCache::new(),
            entry_values,
            exception_values,
            constant_values: BTreeMap::new(),
            string_constants: BTreeMap::new(),
            loaded_fields,
            merged_slots: BTreeMap::new(),
            merged_loads: BTreeMap::new(),
            phi_inputs: BTreeMap::new(),
        })
    }

    #[inline]
    #[must_use]
    pub const fn context(&self) -> &'a AnalysisContext<'a> {
        self.ctx
    }

    #[inline]
    #[must_use]
    pub const fn method(&self) -> &Method<'a> {
        &self.method
    }

    #[inline]
    #[must_use]
    pub const fn factory(&self) -> &ValueNumberFactory {
        &self.factory
    }

    #[inline]
    #[must_use]
    pub fn num_locals(&self) -> usize {
        self.entry_values.len()
    }

    /// Value of a local variable when the method is entered.
    #[must_use]
    pub fn entry_value(&self, local: usize) -> Option<ValueNumber> {
        self.entry_values.get(local).copied()
    }

    /// Value of a declared parameter when the method is entered (first
    /// word of category-2 parameters).
    #[must_use]
    pub fn entry_value_for_parameter(&self, param: usize) -> Option<ValueNumber> {
        let slot = self
            .method
            .descriptor()
            .param_slot(param, self.method.is_static())?;
        self.entry_value(slot)
    }

    /// Value of `this` in instance methods.
    #[must_use]
    pub fn this_value(&self) -> Option<ValueNumber> {
        if self.method.is_static() {
            None
        } else {
            self.entry_value(0)
        }
    }

    #[must_use]
    pub fn is_this_value(&self, vn: ValueNumber) -> bool {
        self.this_value() == Some(vn)
    }

    /// Values merged into a phi value.
    #[must_use]
    pub fn phi_inputs(&self, phi: ValueNumber) -> Option<&BTreeSet<ValueNumber>> {
        self.phi_inputs.get(&phi)
    }

    /// Value of the exception caught at the start of a handler block.
    #[must_use]
    pub fn exception_value(&self, handler: BlockId) -> Option<ValueNumber> {
        self.exception_values.get(&handler).copied()
    }

    /// Content of a string constant value.
    #[must_use]
    pub fn string_constant(&self, vn: ValueNumber) -> Option<&str> {
        self.string_constants.get(&vn).map(String::as_str)
    }

    fn do_redundant_load_elimination(&self, field: &FieldInfo) -> bool {
        self.ctx.options().redundant_load_elimination && field.resolved && !field.is_wide()
    }

    // Stores are only made available for fields read somewhere in the
    // method.
    fn do_forward_substitution(&self, field: &FieldInfo) -> bool {
        self.do_redundant_load_elimination(field) && self.loaded_fields.is_loaded(&field.key)
    }

    // Outputs of an instruction for the given inputs, identical across
    // passes.
    fn output_values(
        &mut self,
        addr: Addr,
        inputs: Vec<ValueNumber>,
        produced: usize,
        flags: ValueFlags,
    ) -> Vec<ValueNumber> {
        if produced == 0 {
            return Vec::new();
        }
        if let Some(outputs) = self.cache.lookup_output_values(addr, &inputs) {
            return outputs.to_vec();
        }
        let outputs: Vec<ValueNumber> = (0..produced)
            .map(|_| self.factory.create_fresh_value(flags))
            .collect();
        self.cache.add_output_values(addr, inputs, outputs.clone());
        outputs
    }

    // Pops the consumed words and pushes fresh (cached) values.
    fn handle_normal(
        &mut self,
        linstr: &LabeledInstr,
        flags: ValueFlags,
        frame: &mut ValueNumberFrame,
    ) -> AnalysisResult<()> {
        let instr = linstr.instr();
        let inputs = frame.pop_words(instr.consumed())?;
        let outputs = self.output_values(linstr.addr(), inputs, instr.produced(), flags);
        for vn in outputs {
            frame.push(vn);
        }
        Ok(())
    }

    fn constant_value(&mut self, constant: &Constant) -> Vec<ValueNumber> {
        if let Some(values) = self.constant_values.get(constant) {
            return values.clone();
        }
        let values: Vec<ValueNumber> = (0..constant.kind().width())
            .map(|_| self.factory.create_fresh_value(ValueFlags::CONSTANT_VALUE))
            .collect();
        if let (Constant::Str(s), Some(vn)) = (constant, values.first()) {
            self.string_constants.insert(*vn, s.clone());
        }
        self.constant_values.insert(constant.clone(), values.clone());
        values
    }

    fn push_constant(&mut self, addr: Addr, constant: &Constant, frame: &mut ValueNumberFrame) {
        let values = match constant {
            Constant::Null => self.output_values(addr, Vec::new(), 1, ValueFlags::CONSTANT_VALUE),
            Constant::Class(typ) => {
                let name = typ
                    .as_class_name()
                    .map_or_else(|_| typ.to_string(), str::to_string);
                vec![self.factory.class_object_value(&name)]
            }
            Constant::Int(_)
            | Constant::Long(_)
            | Constant::Float(_)
            | Constant::Double(_)
            | Constant::Str(_) => self.constant_value(constant),
        };
        for vn in values {
            frame.push(vn);
        }
    }

    fn increment_local(
        &mut self,
        addr: Addr,
        local: usize,
        increment: i32,
        frame: &mut ValueNumberFrame,
    ) -> AnalysisResult<()> {
        if increment == 0 {
            return Ok(());
        }
        let input = *frame.value(local)?;
        let outputs = self.output_values(addr, vec![input], 1, ValueFlags::empty());
        if let Some(vn) = outputs.first() {
            frame.set_value(local, *vn)?;
        }
        Ok(())
    }

    fn load_field(
        &mut self,
        linstr: &LabeledInstr,
        field_ref: &FieldRef,
        is_static: bool,
        frame: &mut ValueNumberFrame,
    ) -> AnalysisResult<()> {
        // Class literals compiled as synthetic static fields.
        if is_static
            && field_ref.name.starts_with("class$")
            && field_ref.typ == Type::class("java/lang/Class")
        {
            let class_name = field_ref.name["class$".len()..].replace('$', "/");
            let vn = self.factory.class_object_value(&class_name);
            frame.push(vn);
            return Ok(());
        }

        let field = self.ctx.repo().field_info(field_ref, is_static);
        if field.is_volatile {
            frame.kill_all_loads(false, self.ctx.field_summary());
        }
        if !self.do_redundant_load_elimination(&field) {
            return self.handle_normal(linstr, ValueFlags::empty(), frame);
        }

        let reference = if is_static { None } else { Some(frame.pop()?) };
        let load = AvailableLoad::new(reference, field);
        let available = frame.available_load(&load).map(<[ValueNumber]>::to_vec);
        let values = match available {
            Some(values) => {
                log::trace!("found available load {load}");
                values
            }
            None => {
                let inputs = reference.into_iter().collect();
                let values =
                    self.output_values(linstr.addr(), inputs, linstr.instr().produced(), ValueFlags::empty());
                log::trace!("making load {load} available");
                frame.add_available_load(load, values.clone());
                values
            }
        };
        for vn in values {
            frame.push(vn);
        }
        Ok(())
    }

    fn store_field(
        &mut self,
        linstr: &LabeledInstr,
        field_ref: &FieldRef,
        is_static: bool,
        frame: &mut ValueNumberFrame,
    ) -> AnalysisResult<()> {
        let field = self.ctx.repo().field_info(field_ref, is_static);
        frame.kill_loads_of_field(&field);
        if !self.do_forward_substitution(&field) {
            return self.handle_normal(linstr, ValueFlags::empty(), frame);
        }

        let mut stored = frame.pop_words(linstr.instr().consumed())?;
        let reference = if is_static {
            None
        } else if stored.is_empty() {
            return Err(crate::frame::FrameError::StackUnderflow.into());
        } else {
            Some(stored.remove(0))
        };
        log::trace!("making store of {field} available");
        frame.add_available_load(AvailableLoad::new(reference, field), stored);
        Ok(())
    }

    /// Kills the loads a called method may invalidate.
    ///
    /// Applied both before modeling the call and on the exception edges
    /// leaving it.
    fn kill_loads_for_call(
        &self,
        kind: InvokeKind,
        called: &MethodRef,
        frame: &mut ValueNumberFrame,
    ) -> AnalysisResult<()> {
        if !self.ctx.options().redundant_load_elimination || !frame.has_available_loads() {
            return Ok(());
        }
        let summary = self.ctx.field_summary();
        if matches!(kind, InvokeKind::Virtual | InvokeKind::Interface)
            && called.name.to_lowercase().contains("lock")
        {
            frame.kill_all_loads(false, summary);
            return Ok(());
        }
        if (kind == InvokeKind::Virtual && is_class_cast(called))
            || (kind == InvokeKind::Static && is_class_lookup(called))
        {
            return Ok(());
        }

        self.kill_loads_of_objects_passed(kind, called, frame)?;
        if kind.is_static() {
            frame.kill_all_loads_of(None, summary);
        }
        Ok(())
    }

    fn kill_loads_of_objects_passed(
        &self,
        kind: InvokeKind,
        called: &MethodRef,
        frame: &mut ValueNumberFrame,
    ) -> AnalysisResult<()> {
        let repo = self.ctx.repo();
        let key = repo
            .resolve_method(&called.class, &called.name, &called.descriptor)
            .map_or_else(|_| MethodKey::from(called), |m| m.key().clone());
        if self.ctx.interproc().is_pure(&key) {
            return Ok(());
        }
        let summary = self.ctx.field_summary();
        if let Some(written) = summary.and_then(|s| s.fields_written(&key)) {
            frame.kill_loads_of(written);
        }
        frame.kill_loads_with_similar_name(&called.class, &called.name);

        let passed = called.descriptor.params_slots() + usize::from(!kind.is_static());
        let arguments = frame.top_words(passed)?.to_vec();
        for vn in arguments {
            frame.kill_all_loads_of(Some(vn), summary);
        }
        // Without a transitive field summary, any call may write any
        // primitive field.
        frame.kill_all_loads(true, summary);
        Ok(())
    }

    fn invoke(
        &mut self,
        linstr: &LabeledInstr,
        kind: InvokeKind,
        called: &MethodRef,
        frame: &mut ValueNumberFrame,
    ) -> AnalysisResult<()> {
        self.kill_loads_for_call(kind, called, frame)?;

        if kind == InvokeKind::Virtual && is_class_cast(called) {
            let value = frame.pop()?;
            frame.pop()?;
            frame.push(value);
            return Ok(());
        }
        if kind == InvokeKind::Static
            && is_class_lookup(called)
            && self.ctx.options().redundant_load_elimination
        {
            let class_name = frame
                .top()
                .ok()
                .and_then(|vn| self.string_constants.get(vn))
                .map(|name| name.replace('.', "/"));
            if let Some(class_name) = class_name {
                log::trace!("found access to class object {class_name}");
                frame.pop()?;
                let vn = self.factory.class_object_value(&class_name);
                frame.push(vn);
                return Ok(());
            }
        }
        self.handle_normal(linstr, ValueFlags::RETURN_VALUE, frame)
    }
}

fn is_class_cast(called: &MethodRef) -> bool {
    called.class == "java/lang/Class" && called.name == "cast"
}

// `Class.forName(String)` and the synthetic `class$(String)` helper.
fn is_class_lookup(called: &MethodRef) -> bool {
    (called.name == "class$" || (called.name == "forName" && called.class == "java/lang/Class"))
        && called.descriptor.params == [Type::class("java/lang/String")]
        && called.descriptor.ret == Type::class("java/lang/Class")
}

// Phi value of a merge point, created on first use and reused on later
// passes.
fn phi_value<K: Ord>(
    factory: &mut ValueNumberFactory,
    phis: &mut BTreeMap<K, ValueNumber>,
    phi_inputs: &mut BTreeMap<ValueNumber, BTreeSet<ValueNumber>>,
    key: K,
    inputs: &[ValueNumber],
) -> ValueNumber {
    let phi = *phis.entry(key).or_insert_with(|| {
        let flags = inputs
            .iter()
            .map(|vn| vn.flags())
            .reduce(merge_flags)
            .unwrap_or_else(ValueFlags::empty);
        factory.create_fresh_value(flags | ValueFlags::PHI_NODE)
    });
    phi_inputs
        .entry(phi)
        .or_default()
        .extend(inputs.iter().copied().filter(|vn| *vn != phi));
    phi
}

impl<'a> DataflowAnalysis for ValueNumberAnalysis<'a> {
    type Fact = ValueNumberFrame;
    type Error = AnalysisError;

    const DIRECTION: FlowDirection = FlowDirection::Forward;

    fn create_fact(&self) -> Self::Fact {
        ValueNumberFrame::new(self.num_locals())
    }

    fn init_entry_fact(&mut self, fact: &mut Self::Fact) -> AnalysisResult<()> {
        fact.set_top();
        fact.set_valid(self.entry_values.clone());
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

    fn meet_into(&mut self, fact: &Self::Fact, edge: &Edge, result: &mut Self::Fact) -> AnalysisResult<()> {
        if fact.is_top() || result.is_bottom() {
            return Ok(());
        }
        if result.is_top() {
            *result = fact.clone();
            return Ok(());
        }
        if fact.is_bottom() {
            result.set_bottom();
            return Ok(());
        }

        let target = edge.target;
        let Self {
            factory,
            merged_slots,
            merged_loads,
            phi_inputs,
            ..
        } = self;
        result.merge_with(fact.frame(), |slot, mine, theirs| {
            if mine == theirs {
                *mine
            } else {
                phi_value(factory, merged_slots, phi_inputs, (target, slot), &[*mine, *theirs])
            }
        })?;
        result.merge_available_loads(fact, |load, mine, theirs| {
            let mut inputs = mine.to_vec();
            inputs.extend_from_slice(theirs.unwrap_or_default());
            phi_value(factory, merged_loads, phi_inputs, (target, load.clone()), &inputs)
        });
        Ok(())
    }

    fn edge_transfer(&self, edge: &Edge, fact: &mut Self::Fact) -> AnalysisResult<()> {
        if !fact.is_valid() {
            return Ok(());
        }
        if edge.is_exception() {
            if let Some(linstr) = self.cfg.block(edge.source).last_instruction() {
                if let Instr::Invoke(kind, called) = linstr.instr() {
                    self.kill_loads_for_call(*kind, called, fact)?;
                }
            }
        }
        if edge.target == self.cfg.exit() {
            fact.clear_stack();
        } else if edge.is_exception() {
            let exception = self.exception_value(edge.target).ok_or_else(|| {
                AnalysisError::Internal(format!("no exception value for handler {}", edge.target.index()))
            })?;
            fact.clear_stack();
            fact.push(exception);
        }
        Ok(())
    }

    fn transfer_instr(
        &mut self,
        _block: BlockId,
        linstr: &LabeledInstr,
        fact: &mut Self::Fact,
    ) -> AnalysisResult<()> {
        let addr = linstr.addr();
        match linstr.instr() {
            Instr::Nop | Instr::CheckCast(_) => (),
            Instr::Const(constant) => self.push_constant(addr, constant, fact),
            Instr::Load(kind, local) => fact.load_local(usize::from(*local), kind.width())?,
            Instr::Store(kind, local) => fact.store_local(usize::from(*local), kind.width())?,
            Instr::Iinc(local, increment) => {
                self.increment_local(addr, usize::from(*local), *increment, fact)?;
            }
            Instr::Stack(op) => fact.apply_stack_op(*op)?,
            Instr::GetField(field) => self.load_field(linstr, field, false, fact)?,
            Instr::GetStatic(field) => self.load_field(linstr, field, true, fact)?,
            Instr::PutField(field) => self.store_field(linstr, field, false, fact)?,
            Instr::PutStatic(field) => self.store_field(linstr, field, true, fact)?,
            Instr::Invoke(kind, called) => self.invoke(linstr, *kind, called, fact)?,
            Instr::MonitorEnter => {
                let locked = fact.top().ok().copied();
                fact.kill_all_loads_except_for(locked);
                self.handle_normal(linstr, ValueFlags::empty(), fact)?;
            }
            Instr::ArrayLoad(_) | Instr::ArrayStore(_) => {
                self.handle_normal(linstr, ValueFlags::ARRAY_VALUE, fact)?;
            }
            Instr::Arith(_, _)
            | Instr::Neg(_)
            | Instr::Convert(_, _)
            | Instr::Compare(_)
            | Instr::If(_, _)
            | Instr::IfCmp(_, _)
            | Instr::IfNull(_)
            | Instr::IfNonNull(_)
            | Instr::IfAcmpEq(_)
            | Instr::IfAcmpNe(_)
            | Instr::Goto(_)
            | Instr::Switch(_, _)
            | Instr::Return(_)
            | Instr::ReturnVoid
            | Instr::New(_)
            | Instr::NewArray(_)
            | Instr::MultiNewArray(_, _)
            | Instr::ArrayLength
            | Instr::Throw
            | Instr::InstanceOf(_)
            | Instr::MonitorExit => self.handle_normal(linstr, ValueFlags::empty(), fact)?,
        }
        Ok(())
    }
}
