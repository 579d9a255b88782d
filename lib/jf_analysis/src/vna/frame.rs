use crate::fields::FieldSummary;
use crate::frame::{Frame, FrameError, FrameResult};
use crate::repo::{FieldInfo, FieldKey};
use crate::vna::value::ValueNumber;
use jf_bytecode::types::{MethodDescriptor, Type};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A field load: the field, and the value number of the object it is
/// loaded from (`None` for static fields).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AvailableLoad {
    reference: Option<ValueNumber>,
    field: FieldInfo,
}

impl AvailableLoad {
    #[must_use]
    pub const fn new(reference: Option<ValueNumber>, field: FieldInfo) -> Self {
        Self { reference, field }
    }

    #[inline]
    #[must_use]
    pub const fn reference(&self) -> Option<ValueNumber> {
        self.reference
    }

    #[inline]
    #[must_use]
    pub const fn field(&self) -> &FieldInfo {
        &self.field
    }

    #[must_use]
    pub fn matches_reference(&self, vn: Option<ValueNumber>) -> bool {
        self.reference == vn
    }
}

impl fmt::Display for AvailableLoad {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.reference {
            Some(vn) => write!(f, "{vn}.{}", self.field.name()),
            None => write!(f, "{}", self.field),
        }
    }
}

type LoadMap = BTreeMap<AvailableLoad, Vec<ValueNumber>>;

/// Value numbers of the locals and stack slots at one program point,
/// together with the field loads whose values are still known.
///
/// Load maps are shared between the frames copied from one another, and
/// only copied when a frame modifies them.
#[derive(Debug, Clone)]
pub struct ValueNumberFrame {
    frame: Frame<ValueNumber>,
    available_loads: Arc<LoadMap>,
    previously_known_as: Arc<BTreeMap<ValueNumber, AvailableLoad>>,
}

impl Deref for ValueNumberFrame {
    type Target = Frame<ValueNumber>;

    fn deref(&self) -> &Self::Target {
        &self.frame
    }
}

impl DerefMut for ValueNumberFrame {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.frame
    }
}

impl ValueNumberFrame {
    /// A TOP frame.
    #[must_use]
    pub fn new(num_locals: usize) -> Self {
        Self {
            frame: Frame::new(num_locals),
            available_loads: Arc::new(BTreeMap::new()),
            previously_known_as: Arc::new(BTreeMap::new()),
        }
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> &Frame<ValueNumber> {
        &self.frame
    }

    pub fn set_top(&mut self) {
        self.frame.set_top();
        self.clear_loads();
    }

    pub fn set_bottom(&mut self) {
        self.frame.set_bottom();
        self.clear_loads();
    }

    fn clear_loads(&mut self) {
        if !self.available_loads.is_empty() {
            self.available_loads = Arc::new(BTreeMap::new());
        }
    }

    #[must_use]
    pub fn has_available_loads(&self) -> bool {
        !self.available_loads.is_empty()
    }

    pub fn iter_available_loads(&self) -> impl Iterator<Item = (&AvailableLoad, &[ValueNumber])> {
        self.available_loads.iter().map(|(k, v)| (k, v.as_slice()))
    }

    #[must_use]
    pub fn available_load(&self, load: &AvailableLoad) -> Option<&[ValueNumber]> {
        self.available_loads.get(load).map(Vec::as_slice)
    }

    pub fn add_available_load(&mut self, load: AvailableLoad, values: Vec<ValueNumber>) {
        let known = Arc::make_mut(&mut self.previously_known_as);
        for vn in &values {
            known.insert(*vn, load.clone());
        }
        Arc::make_mut(&mut self.available_loads).insert(load, values);
    }

    /// The load currently holding the given value, if any.
    #[must_use]
    pub fn load_of(&self, vn: ValueNumber) -> Option<&AvailableLoad> {
        self.available_loads
            .iter()
            .find(|(_, values)| values.contains(&vn))
            .map(|(load, _)| load)
    }

    /// The load that held the given value, even if it has been killed
    /// since.
    #[must_use]
    pub fn previously_known_as(&self, vn: ValueNumber) -> Option<&AvailableLoad> {
        self.load_of(vn)
            .or_else(|| self.previously_known_as.get(&vn))
    }

    fn kill_loads_where<F>(&mut self, kill: F)
    where
        F: Fn(&AvailableLoad) -> bool,
    {
        if self.available_loads.keys().any(&kill) {
            Arc::make_mut(&mut self.available_loads).retain(|load, _| {
                let killed = kill(load);
                if killed {
                    log::trace!("killing load of {load}");
                }
                !killed
            });
        }
    }

    pub fn kill_loads_of_field(&mut self, field: &FieldInfo) {
        self.kill_loads_where(|load| load.field.key == field.key);
    }

    /// Kills the loads of the fields an unknown method may write: fields
    /// which are volatile, or not final and written outside of a
    /// constructor. With `primitive_only`, reference fields are kept.
    pub fn kill_all_loads(&mut self, primitive_only: bool, summary: Option<&FieldSummary>) {
        self.kill_loads_where(|load| {
            let field = &load.field;
            (!primitive_only || !field.is_reference())
                && (field.is_volatile || (!field.is_final && may_be_written(summary, field)))
        });
    }

    /// Kills the loads of non-final fields, except the load of the given
    /// value.
    pub fn kill_all_loads_except_for(&mut self, vn: Option<ValueNumber>) {
        let kept = vn.and_then(|vn| self.load_of(vn)).cloned();
        self.kill_loads_where(|load| !load.field.is_final && Some(load) != kept.as_ref());
    }

    /// Kills the loads of non-final fields of the given object (static
    /// fields for `None`).
    pub fn kill_all_loads_of(&mut self, reference: Option<ValueNumber>, summary: Option<&FieldSummary>) {
        self.kill_loads_where(|load| {
            load.matches_reference(reference)
                && !load.field.is_final
                && may_be_written(summary, &load.field)
        });
    }

    pub fn kill_loads_of(&mut self, fields: &BTreeSet<FieldKey>) {
        self.kill_loads_where(|load| fields.contains(&load.field.key));
    }

    /// Kills the loads of static fields declared in the package of the
    /// called class and whose name appears in the called method name.
    pub fn kill_loads_with_similar_name(&mut self, class_name: &str, method_name: &str) {
        let package = package_name(class_name);
        let method_name = method_name.to_lowercase();
        self.kill_loads_where(|load| {
            let field = &load.field;
            field.is_static
                && package_name(field.class_name()) == package
                && method_name.contains(&field.name().to_lowercase())
        });
    }

    /// Merges the load maps of two frames reaching the same point: loads
    /// whose values differ are given a phi value by `phi_for`, called with
    /// the load and the values in both frames.
    ///
    /// Returns whether this frame loads changed.
    pub fn merge_available_loads<F>(&mut self, other: &Self, mut phi_for: F) -> bool
    where
        F: FnMut(&AvailableLoad, &[ValueNumber], Option<&[ValueNumber]>) -> ValueNumber,
    {
        let mut changed = false;
        if other.is_bottom() {
            changed = self.has_available_loads();
            self.clear_loads();
        } else if !other.is_top() && !Arc::ptr_eq(&self.available_loads, &other.available_loads) {
            let updates: Vec<(AvailableLoad, ValueNumber)> = self
                .available_loads
                .iter()
                .filter_map(|(load, mine)| {
                    let theirs = other.available_loads.get(load).map(Vec::as_slice);
                    if theirs == Some(mine.as_slice()) {
                        None
                    } else {
                        Some((load.clone(), phi_for(load, mine, theirs)))
                    }
                })
                .collect();
            for (load, phi) in updates {
                let map = Arc::make_mut(&mut self.available_loads);
                if map.get(&load).map(Vec::as_slice) != Some(&[phi]) {
                    map.insert(load, vec![phi]);
                    changed = true;
                }
            }
        }

        if !Arc::ptr_eq(&self.previously_known_as, &other.previously_known_as)
            && !other.previously_known_as.is_empty()
        {
            if self.previously_known_as.is_empty() {
                self.previously_known_as = Arc::clone(&other.previously_known_as);
            } else {
                let known = Arc::make_mut(&mut self.previously_known_as);
                for (vn, load) in other.previously_known_as.iter() {
                    known.insert(*vn, load.clone());
                }
            }
        }
        changed
    }

    /// Value of the given parameter of a call about to be made with this
    /// frame (first word for category-2 parameters).
    pub fn argument_value(&self, descriptor: &MethodDescriptor, param: usize) -> FrameResult<ValueNumber> {
        let depth: usize = descriptor.params.iter().skip(param).map(Type::slots).sum();
        if depth == 0 {
            return Err(FrameError::StackUnderflow);
        }
        self.frame.stack_value(depth - 1).copied()
    }

    /// Receiver of an instance call about to be made with this frame.
    pub fn instance_value(&self, descriptor: &MethodDescriptor) -> FrameResult<ValueNumber> {
        self.frame.stack_value(descriptor.params_slots()).copied()
    }

    /// Does any slot of the frame hold the given value?
    #[must_use]
    pub fn contains(&self, vn: ValueNumber) -> bool {
        self.frame.slots().any(|v| *v == vn)
    }

    /// Same value, values loaded from the same field of the same object,
    /// or values sharing a flag.
    #[must_use]
    pub fn fuzzy_match(&self, vn1: ValueNumber, vn2: ValueNumber) -> bool {
        vn1 == vn2 || self.from_matching_loads(vn1, vn2) || have_matching_flags(vn1, vn2)
    }

    /// Like [`Self::fuzzy_match`], but values loaded from the same field of
    /// different objects also match when one of the objects is not in the
    /// frame anymore.
    #[must_use]
    pub fn very_fuzzy_match(&self, vn1: ValueNumber, vn2: ValueNumber) -> bool {
        vn1 == vn2 || self.from_matching_fields(vn1, vn2) || have_matching_flags(vn1, vn2)
    }

    #[must_use]
    pub fn from_matching_loads(&self, vn1: ValueNumber, vn2: ValueNumber) -> bool {
        match (self.previously_known_as(vn1), self.previously_known_as(vn2)) {
            (Some(load1), Some(load2)) => load1 == load2,
            _ => false,
        }
    }

    #[must_use]
    pub fn from_matching_fields(&self, vn1: ValueNumber, vn2: ValueNumber) -> bool {
        let (load1, load2) = match (self.previously_known_as(vn1), self.previously_known_as(vn2)) {
            (Some(load1), Some(load2)) => (load1, load2),
            _ => return false,
        };
        if load1 == load2 {
            return true;
        }
        if load1.field.key != load2.field.key {
            return false;
        }
        let in_scope = |reference: Option<ValueNumber>| reference.map_or(false, |r| self.contains(r));
        !in_scope(load1.reference) || !in_scope(load2.reference)
    }

    /// Values held by the available loads.
    #[must_use]
    pub fn value_numbers_for_loads(&self) -> BTreeSet<ValueNumber> {
        self.available_loads.values().flatten().copied().collect()
    }

    /// Same slots and same available loads.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.frame == other.frame
            && (Arc::ptr_eq(&self.available_loads, &other.available_loads)
                || self.available_loads == other.available_loads)
    }
}

#[must_use]
pub fn have_matching_flags(vn1: ValueNumber, vn2: ValueNumber) -> bool {
    vn1.flags().intersects(vn2.flags())
}

fn may_be_written(summary: Option<&FieldSummary>, field: &FieldInfo) -> bool {
    summary.map_or(true, |s| s.is_written_outside_of_constructor(field))
}

fn package_name(class_name: &str) -> &str {
    class_name.rsplit_once('/').map_or("", |(package, _)| package)
}

impl fmt::Display for ValueNumberFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.frame)?;
        if self.has_available_loads() {
            write!(f, " {{")?;
            for (i, (load, values)) in self.available_loads.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, " {load}=[")?;
                for (j, vn) in values.iter().enumerate() {
                    if j > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{vn}")?;
                }
                write!(f, "]")?;
            }
            write!(f, " }}")?;
        }
        Ok(())
    }
}
