use crate::frame::Frame;
use crate::npe::decision::IsNullConditionDecision;
use crate::npe::value::IsNullValue;
use crate::vna::{ValueNumber, ValueNumberFrame};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Nullness of the locals and stack slots at one program point.
///
/// Besides the slots, the frame remembers the nullness established for
/// value numbers that may be produced again later (redundant field loads),
/// and the decision of the null comparison ending its block.
#[derive(Debug, Clone)]
pub struct IsNullValueFrame {
    frame: Frame<IsNullValue>,
    known_values: BTreeMap<ValueNumber, IsNullValue>,
    decision: Option<IsNullConditionDecision>,
}

impl Deref for IsNullValueFrame {
    type Target = Frame<IsNullValue>;

    fn deref(&self) -> &Self::Target {
        &self.frame
    }
}

impl DerefMut for IsNullValueFrame {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.frame
    }
}

impl IsNullValueFrame {
    /// A TOP frame.
    #[must_use]
    pub fn new(num_locals: usize) -> Self {
        Self {
            frame: Frame::new(num_locals),
            known_values: BTreeMap::new(),
            decision: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> &Frame<IsNullValue> {
        &self.frame
    }

    pub fn set_top(&mut self) {
        self.frame.set_top();
        self.known_values.clear();
        self.decision = None;
    }

    pub fn set_bottom(&mut self) {
        self.frame.set_bottom();
        self.known_values.clear();
        self.decision = None;
    }

    #[inline]
    #[must_use]
    pub const fn decision(&self) -> Option<&IsNullConditionDecision> {
        self.decision.as_ref()
    }

    pub fn set_decision(&mut self, decision: Option<IsNullConditionDecision>) {
        self.decision = decision;
    }

    #[must_use]
    pub fn known_value(&self, vn: ValueNumber) -> Option<&IsNullValue> {
        self.known_values.get(&vn)
    }

    pub fn set_known_value(&mut self, vn: ValueNumber, value: IsNullValue) {
        log::trace!("value {vn} is known to be {value}");
        self.known_values.insert(vn, value);
    }

    pub fn iter_known_values(&self) -> impl Iterator<Item = (&ValueNumber, &IsNullValue)> {
        self.known_values.iter()
    }

    /// Moves the knowledge about a load to the value number it has in a
    /// successor block.
    pub fn use_new_value_number_for_load(&mut self, old: ValueNumber, new: ValueNumber) {
        if old == new {
            return;
        }
        if let Some(value) = self.known_values.remove(&old) {
            self.known_values.insert(new, value);
        }
    }

    /// Forgets the known values that are no longer available loads.
    pub fn clean_stale_knowledge(&mut self, vna_frame: &ValueNumberFrame) {
        self.known_values
            .retain(|vn, _| vna_frame.load_of(*vn).is_some());
    }

    /// Keeps the values known in both frames, merged.
    pub fn merge_known_values_with(&mut self, other: &Self) {
        let merged = self
            .known_values
            .iter()
            .filter_map(|(vn, value)| {
                other
                    .known_values
                    .get(vn)
                    .map(|theirs| (*vn, IsNullValue::merge(value, theirs)))
            })
            .collect();
        self.known_values = merged;
    }

    fn map_values<F>(&mut self, f: F)
    where
        F: Fn(&IsNullValue) -> IsNullValue,
    {
        for value in self.frame.slots_mut() {
            *value = f(value);
        }
        for value in self.known_values.values_mut() {
            *value = f(value);
        }
    }

    /// Marks every value as flowing along an exception path.
    pub fn to_exception_values(&mut self) {
        self.map_values(|v| v.clone().to_exception_value());
    }

    pub fn downgrade_on_control_split(&mut self) {
        self.map_values(|v| v.clone().downgrade_on_control_split());
    }

    /// Null and null on some path values become non-reporting.
    pub fn erase_null_info(&mut self) {
        self.map_values(|v| {
            if v.might_be_null() {
                IsNullValue::non_reporting_non_null()
            } else {
                v.clone()
            }
        });
    }

    /// Sets the nullness of every slot holding one of the given value
    /// numbers (`vna_frame` is the value numbers frame of this frame).
    pub fn set_slots_holding(&mut self, vna_frame: &ValueNumberFrame, vn: ValueNumber, value: &IsNullValue) {
        for (slot, held) in self.frame.slots_mut().zip(vna_frame.slots()) {
            if *held == vn {
                *slot = value.clone();
            }
        }
    }

    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.frame == other.frame && self.known_values == other.known_values && self.decision == other.decision
    }
}

impl fmt::Display for IsNullValueFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.frame)?;
        if let Some(decision) = &self.decision {
            write!(f, ", [decision={decision}]")?;
        }
        if !self.known_values.is_empty() {
            write!(f, ", [known=")?;
            for (i, (vn, value)) in self.known_values.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{vn}->{value}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vna::{ValueFlags, ValueNumberFactory, ValueNumberFrame};

    #[test]
    fn known_values() {
        let mut factory = ValueNumberFactory::new();
        let v1 = factory.create_fresh_value(ValueFlags::empty());
        let v2 = factory.create_fresh_value(ValueFlags::empty());

        let mut a = IsNullValueFrame::new(1);
        a.set_valid(vec![IsNullValue::non_reporting_non_null()]);
        a.set_known_value(v1, IsNullValue::null());
        a.set_known_value(v2, IsNullValue::non_null());
        let mut b = a.clone();
        b.set_known_value(v1, IsNullValue::non_null());
        b.use_new_value_number_for_load(v2, v1);
        assert_eq!(b.known_value(v1), Some(&IsNullValue::non_null()));
        assert!(b.known_value(v2).is_none());

        a.merge_known_values_with(&b);
        assert!(a.known_value(v1).unwrap().is_null_on_some_path());
        assert!(a.known_value(v2).is_none());

        a.erase_null_info();
        assert_eq!(a.known_value(v1), Some(&IsNullValue::non_reporting_non_null()));
    }

    #[test]
    fn slots_holding_a_value() {
        let mut factory = ValueNumberFactory::new();
        let v1 = factory.create_fresh_value(ValueFlags::empty());
        let v2 = factory.create_fresh_value(ValueFlags::empty());

        let mut vna_frame = ValueNumberFrame::new(2);
        vna_frame.set_valid(vec![v1, v2]);
        vna_frame.push(v1);
        vna_frame.push(v1);

        // one stack slot less than the value numbers frame
        let mut frame = IsNullValueFrame::new(2);
        frame.set_valid(vec![IsNullValue::non_reporting_non_null(); 2]);
        frame.push(IsNullValue::non_reporting_non_null());
        frame.set_slots_holding(&vna_frame, v1, &IsNullValue::null());
        assert_eq!(frame.num_slots(), 3);
        assert!(frame.value(0).unwrap().is_definitely_null());
        assert!(!frame.value(1).unwrap().is_definitely_null());
        assert!(frame.top().unwrap().is_definitely_null());
    }

    #[test]
    fn exception_values() {
        let mut frame = IsNullValueFrame::new(2);
        frame.set_valid(vec![IsNullValue::null_on_simple_path(), IsNullValue::non_null()]);
        frame.to_exception_values();
        assert!(frame.slots().all(IsNullValue::is_exception));
        frame.downgrade_on_control_split();
        assert_eq!(frame.value(0).unwrap().kind(), crate::npe::NullKind::NullOnComplexPath);
        assert_eq!(frame.to_string(), "[ / N ]");
    }
}
