//! Instruction transfer of the null value analysis.

use crate::assertions::is_fatal_logging_level;
use crate::context::AnalysisContext;
use crate::errors::AnalysisResult;
use crate::npe::frame::IsNullValueFrame;
use crate::npe::value::IsNullValue;
use crate::repo::{FieldInfo, MethodKey};
use crate::typequal::{TypeQualifierValue, When};
use crate::vna::{AvailableLoad, ValueNumber, ValueNumberDataflow, ValueNumberFrame};
use jf_bytecode::code::LabeledInstr;
use jf_bytecode::instrs::{Constant, Instr, InvokeKind};
use jf_bytecode::refs::{FieldRef, MethodRef};
use jf_bytecode::Addr;

/// Models the effect of single instructions on an [`IsNullValueFrame`],
/// using the value numbers computed for the same method.
#[derive(Debug)]
pub struct IsNullValueModelingVisitor<'a> {
    vna: &'a ValueNumberDataflow<'a>,
    nonnull: TypeQualifierValue,
}

impl<'a> IsNullValueModelingVisitor<'a> {
    #[must_use]
    pub fn new(vna: &'a ValueNumberDataflow<'a>) -> Self {
        Self {
            vna,
            nonnull: TypeQualifierValue::nonnull(),
        }
    }

    fn ctx(&self) -> &'a AnalysisContext<'a> {
        self.vna.analysis().context()
    }

    /// Transfers `frame` over one instruction.
    pub fn analyze_instruction(&self, linstr: &LabeledInstr, frame: &mut IsNullValueFrame) -> AnalysisResult<()> {
        let addr = linstr.addr();
        let vna_at = self.vna.fact_at(addr)?;
        let vna_after = self.vna.fact_after(addr)?;
        let dereferenced = if vna_at.is_valid() {
            dereferenced_value(linstr.instr(), vna_at)
        } else {
            None
        };

        match linstr.instr() {
            Instr::Nop | Instr::CheckCast(_) | Instr::Iinc(_, _) => (),
            Instr::Const(Constant::Null) => frame.push(IsNullValue::null()),
            Instr::Const(Constant::Str(_) | Constant::Class(_)) => frame.push(IsNullValue::non_null()),
            Instr::Load(kind, local) => frame.load_local(usize::from(*local), kind.width())?,
            Instr::Store(kind, local) => frame.store_local(usize::from(*local), kind.width())?,
            Instr::Stack(op) => frame.apply_stack_op(*op)?,
            Instr::New(_) | Instr::NewArray(_) | Instr::MultiNewArray(_, _) => {
                frame.pop_words(linstr.instr().consumed())?;
                frame.push(IsNullValue::non_null());
            }
            Instr::GetField(field) => self.load_field(linstr, field, false, vna_after, frame)?,
            Instr::GetStatic(field) => self.load_field(linstr, field, true, vna_after, frame)?,
            Instr::PutField(field) => self.store_field(linstr, field, false, vna_at, vna_after, frame)?,
            Instr::PutStatic(field) => self.store_field(linstr, field, true, vna_at, vna_after, frame)?,
            Instr::Invoke(kind, called) => self.invoke(linstr, *kind, called, frame)?,
            _ => self.handle_normal(linstr, frame)?,
        }

        if let Some(vn) = dereferenced {
            self.mark_dereference(addr, vn, vna_after, frame);
        }

        let ctx = self.ctx();
        if frame.is_valid() && ctx.options().erase_null_info_after_assertions {
            let code = self.vna.analysis().method().code();
            if code.map_or(false, |code| ctx.assertions().is_assertion_at(code, addr)) {
                log::trace!("erasing null information after assertion @{addr}");
                frame.erase_null_info();
            }
        }
        Ok(())
    }

    // Pops the consumed words and pushes non-reporting values.
    fn handle_normal(&self, linstr: &LabeledInstr, frame: &mut IsNullValueFrame) -> AnalysisResult<()> {
        let instr = linstr.instr();
        frame.pop_words(instr.consumed())?;
        for _ in 0..instr.produced() {
            frame.push(IsNullValue::non_reporting_non_null());
        }
        Ok(())
    }

    fn load_field(
        &self,
        linstr: &LabeledInstr,
        field_ref: &FieldRef,
        is_static: bool,
        vna_after: &ValueNumberFrame,
        frame: &mut IsNullValueFrame,
    ) -> AnalysisResult<()> {
        if is_static && is_fatal_logging_level(field_ref) {
            frame.to_exception_values();
        }
        let field = self.ctx().repo().field_info(field_ref, is_static);
        if !field.is_reference() {
            return self.handle_normal(linstr, frame);
        }
        frame.pop_words(linstr.instr().consumed())?;

        let loaded = if vna_after.is_valid() {
            vna_after.top().ok().copied()
        } else {
            None
        };
        if let Some(known) = loaded.and_then(|vn| frame.known_value(vn)).cloned() {
            log::trace!("reusing known value {known} for load of {field_ref}");
            frame.push(known);
            return Ok(());
        }

        let value = if is_static && field_ref.name.starts_with("class$") {
            IsNullValue::non_null()
        } else {
            self.field_value(&field)
        };
        if let Some(vn) = loaded {
            if vna_after.load_of(vn).is_some() {
                frame.set_known_value(vn, value.clone());
            }
        }
        frame.push(value);
        Ok(())
    }

    fn field_value(&self, field: &FieldInfo) -> IsNullValue {
        match self.ctx().annotations().field(field, &self.nonnull) {
            Some(When::Always) => IsNullValue::non_null().from_field_value(field.key.clone()),
            Some(When::Maybe) => IsNullValue::null_on_simple_path().from_field_value(field.key.clone()),
            _ => IsNullValue::non_reporting_non_null(),
        }
    }

    // The stored value becomes the known value of the load made available
    // by the store.
    fn store_field(
        &self,
        linstr: &LabeledInstr,
        field_ref: &FieldRef,
        is_static: bool,
        vna_at: &ValueNumberFrame,
        vna_after: &ValueNumberFrame,
        frame: &mut IsNullValueFrame,
    ) -> AnalysisResult<()> {
        let field = self.ctx().repo().field_info(field_ref, is_static);
        let stored = if field.is_reference() {
            frame.top().ok().cloned()
        } else {
            None
        };
        let reference = if is_static || !vna_at.is_valid() {
            None
        } else {
            vna_at.stack_value(field_ref.slots()).ok().copied()
        };
        frame.pop_words(linstr.instr().consumed())?;

        let Some(stored) = stored else {
            return Ok(());
        };
        if !vna_after.is_valid() || (!is_static && reference.is_none()) {
            return Ok(());
        }
        let load = AvailableLoad::new(reference, field);
        if let Some(vns) = vna_after.available_load(&load) {
            for vn in vns.to_vec() {
                frame.set_known_value(vn, stored.clone());
            }
        }
        Ok(())
    }

    fn invoke(
        &self,
        linstr: &LabeledInstr,
        kind: InvokeKind,
        called: &MethodRef,
        frame: &mut IsNullValueFrame,
    ) -> AnalysisResult<()> {
        if !called.descriptor.ret.is_reference() {
            return self.handle_normal(linstr, frame);
        }
        frame.pop_words(linstr.instr().consumed())?;
        let value = self.return_value(kind, called);
        log::trace!("return value of {}.{} is {value:#}", called.class, called.name);
        frame.push(value);
        Ok(())
    }

    /// Nullness of the value returned by a call: the merge of the return
    /// values of every possible target, or the annotation of the called
    /// method when no target is known.
    fn return_value(&self, kind: InvokeKind, called: &MethodRef) -> IsNullValue {
        let ctx = self.ctx();
        let repo = ctx.repo();
        let targets = repo.resolve_call_targets(called, kind).unwrap_or_else(|err| {
            log::debug!("cannot resolve targets of {}.{}: {err}", called.class, called.name);
            Vec::new()
        });
        let merged = targets
            .iter()
            .map(|target| {
                let when = ctx
                    .annotations()
                    .return_value(repo, target, &self.nonnull)
                    .or_else(|| ctx.interproc().return_value(target.key(), &self.nonnull));
                return_value_of(when, target.key())
            })
            .reduce(|a, b| IsNullValue::merge(&a, &b));
        merged.unwrap_or_else(|| {
            let key = MethodKey::from(called);
            let when = ctx
                .annotations()
                .called_return_value(repo, called, &self.nonnull)
                .or_else(|| ctx.interproc().return_value(&key, &self.nonnull));
            return_value_of(when, &key)
        })
    }

    // A value that did not raise an exception when dereferenced is not
    // null anymore, in every slot holding it.
    fn mark_dereference(&self, addr: Addr, vn: ValueNumber, vna_after: &ValueNumberFrame, frame: &mut IsNullValueFrame) {
        if !frame.is_valid() {
            return;
        }
        let current = frame.known_value(vn).cloned().or_else(|| {
            let nslots = frame.num_slots().min(vna_after.num_slots());
            (0..nslots)
                .find(|slot| vna_after.value(*slot).map_or(false, |v| *v == vn))
                .and_then(|slot| frame.value(slot).ok().cloned())
        });
        if current.as_ref().map_or(false, IsNullValue::is_definitely_null) {
            log::trace!("null dereference @{addr}: no normal successor");
            frame.set_top();
            return;
        }
        if current.as_ref().map_or(false, IsNullValue::is_definitely_not_null) {
            return;
        }
        let kaboom = IsNullValue::no_kaboom_non_null(addr);
        if vna_after.is_valid() {
            frame.set_slots_holding(vna_after, vn, &kaboom);
            if frame.known_value(vn).is_some() || vna_after.load_of(vn).is_some() {
                frame.set_known_value(vn, kaboom);
            }
        }
    }
}

fn return_value_of(when: Option<When>, method: &MethodKey) -> IsNullValue {
    match when {
        Some(When::Maybe) => IsNullValue::null_on_simple_path().from_return_value_of(method.clone()),
        Some(When::Always) => IsNullValue::non_null().from_return_value_of(method.clone()),
        _ => IsNullValue::non_reporting_non_null(),
    }
}

/// Value number of the reference an instruction dereferences, given the
/// value numbers before the instruction.
#[must_use]
pub fn dereferenced_value(instr: &Instr, vna_at: &ValueNumberFrame) -> Option<ValueNumber> {
    let depth = match instr {
        Instr::GetField(_) | Instr::ArrayLength | Instr::Throw | Instr::MonitorEnter | Instr::MonitorExit => 0,
        Instr::PutField(field) => field.slots(),
        Instr::ArrayLoad(_) => 1,
        Instr::ArrayStore(kind) => 1 + kind.width(),
        Instr::Invoke(kind, called) if !kind.is_static() => {
            return vna_at.instance_value(&called.descriptor).ok();
        }
        _ => return None,
    };
    vna_at.stack_value(depth).ok().copied()
}
