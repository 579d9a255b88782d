use crate::controlflow::Branch;
use crate::npe::value::IsNullValue;
use crate::vna::ValueNumber;
use std::fmt;

/// What a null comparison ending a block tells about the tested value on
/// each of its successors.
///
/// A missing value means the corresponding successor is infeasible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsNullConditionDecision {
    value: Option<ValueNumber>,
    if_taken: Option<IsNullValue>,
    fall_through: Option<IsNullValue>,
}

impl IsNullConditionDecision {
    #[must_use]
    pub const fn new(
        value: Option<ValueNumber>,
        if_taken: Option<IsNullValue>,
        fall_through: Option<IsNullValue>,
    ) -> Self {
        Self {
            value,
            if_taken,
            fall_through,
        }
    }

    /// Decision of `ifnull` (or `ifnonnull` when `ifnull` is false) on a
    /// value with the given nullness.
    #[must_use]
    pub fn for_null_check(tested: &IsNullValue, value: ValueNumber, ifnull: bool) -> Self {
        let mut if_taken = None;
        let mut fall_through = None;
        if tested.is_definitely_null() {
            if ifnull {
                if_taken = Some(IsNullValue::checked_null());
            } else {
                fall_through = Some(IsNullValue::checked_null());
            }
        } else if tested.is_definitely_not_null() {
            let known = if tested.would_have_been_a_kaboom() {
                tested.clone()
            } else {
                IsNullValue::checked_non_null()
            };
            if ifnull {
                fall_through = Some(known);
            } else {
                if_taken = Some(known);
            }
        } else if ifnull {
            if_taken = Some(IsNullValue::checked_null());
            fall_through = Some(IsNullValue::checked_non_null());
        } else {
            if_taken = Some(IsNullValue::checked_non_null());
            fall_through = Some(IsNullValue::checked_null());
        }
        Self::new(Some(value), if_taken, fall_through)
    }

    /// Decision of `if_acmpeq` (or `if_acmpne` when `cmpeq` is false)
    /// comparing the two top of stack values, given with their value
    /// numbers (top of stack last).
    #[must_use]
    pub fn for_reference_comparison(
        next_to_top: (&IsNullValue, ValueNumber),
        top: (&IsNullValue, ValueNumber),
        cmpeq: bool,
    ) -> Option<Self> {
        let (ntos, ntos_vn) = next_to_top;
        let (tos, tos_vn) = top;
        if tos.is_definitely_null() && ntos.is_definitely_null() {
            let (if_taken, fall_through) = if cmpeq {
                (Some(IsNullValue::checked_null()), None)
            } else {
                (None, Some(IsNullValue::checked_null()))
            };
            return Some(Self::new(None, if_taken, fall_through));
        }
        if tos.is_definitely_null() {
            return Some(Self::for_null_check(ntos, ntos_vn, cmpeq));
        }
        if ntos.is_definitely_null() {
            return Some(Self::for_null_check(tos, tos_vn, cmpeq));
        }
        // Comparing with a non null value tells the other one is not null
        // when they are equal.
        let (known, unknown, vn) = match (tos.is_definitely_not_null(), ntos.is_definitely_not_null()) {
            (true, false) => (tos, ntos, ntos_vn),
            (false, true) => (ntos, tos, tos_vn),
            _ => return None,
        };
        let (if_taken, fall_through) = if cmpeq {
            (known.clone(), unknown.clone())
        } else {
            (unknown.clone(), known.clone())
        };
        Some(Self::new(Some(vn), Some(if_taken), Some(fall_through)))
    }

    /// Decision of `instanceof` followed by `ifeq` (when `if_not_instance`
    /// is true) or `ifne`: a value passing the test is not null.
    #[must_use]
    pub fn for_instance_of(tested: &IsNullValue, value: ValueNumber, if_not_instance: bool) -> Option<Self> {
        if tested.is_definitely_not_null() {
            return None;
        }
        if tested.is_definitely_null() {
            return Some(if if_not_instance {
                Self::new(Some(value), Some(tested.clone()), None)
            } else {
                Self::new(Some(value), None, Some(tested.clone()))
            });
        }
        Some(if if_not_instance {
            Self::new(Some(value), Some(tested.clone()), Some(IsNullValue::checked_non_null()))
        } else {
            Self::new(Some(value), Some(IsNullValue::checked_non_null()), Some(tested.clone()))
        })
    }

    /// The tested value, if any slot needs to be updated.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> Option<ValueNumber> {
        self.value
    }

    #[must_use]
    pub const fn is_edge_feasible(&self, branch: &Branch) -> bool {
        match branch {
            Branch::IfTrue => self.if_taken.is_some(),
            Branch::IfFalse => self.fall_through.is_some(),
            _ => true,
        }
    }

    /// Nullness of the tested value along a successor edge.
    #[must_use]
    pub const fn decision(&self, branch: &Branch) -> Option<&IsNullValue> {
        match branch {
            Branch::IfTrue => self.if_taken.as_ref(),
            Branch::IfFalse => self.fall_through.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for IsNullConditionDecision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let show = |v: &Option<IsNullValue>| v.as_ref().map_or_else(|| "infeasible".to_string(), ToString::to_string);
        match self.value {
            Some(vn) => write!(f, "{vn}: ")?,
            None => write!(f, "_: ")?,
        }
        write!(f, "taken {}, fallthrough {}", show(&self.if_taken), show(&self.fall_through))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vna::{ValueFlags, ValueNumberFactory};

    #[test]
    fn null_checks() {
        let vn = ValueNumberFactory::new().create_fresh_value(ValueFlags::empty());

        let unknown = IsNullValue::non_reporting_non_null();
        let d = IsNullConditionDecision::for_null_check(&unknown, vn, true);
        assert!(d.decision(&Branch::IfTrue).unwrap().is_definitely_null());
        assert!(d.decision(&Branch::IfFalse).unwrap().is_definitely_not_null());
        assert_eq!(d.value(), Some(vn));

        let d = IsNullConditionDecision::for_null_check(&IsNullValue::null(), vn, false);
        assert!(!d.is_edge_feasible(&Branch::IfTrue));
        assert!(d.is_edge_feasible(&Branch::IfFalse));

        let kaboom = IsNullValue::no_kaboom_non_null(jf_bytecode::Addr(2));
        let d = IsNullConditionDecision::for_null_check(&kaboom, vn, true);
        assert!(!d.is_edge_feasible(&Branch::IfTrue));
        assert_eq!(d.decision(&Branch::IfFalse), Some(&kaboom));
    }

    #[test]
    fn reference_comparisons() {
        let mut factory = ValueNumberFactory::new();
        let a = factory.create_fresh_value(ValueFlags::empty());
        let b = factory.create_fresh_value(ValueFlags::empty());
        let unknown = IsNullValue::non_reporting_non_null();

        // x == null
        let d = IsNullConditionDecision::for_reference_comparison((&unknown, a), (&IsNullValue::null(), b), true)
            .unwrap();
        assert_eq!(d.value(), Some(a));
        assert!(d.decision(&Branch::IfTrue).unwrap().is_definitely_null());

        // x != new Object()
        let d =
            IsNullConditionDecision::for_reference_comparison((&unknown, a), (&IsNullValue::non_null(), b), false)
                .unwrap();
        assert_eq!(d.value(), Some(a));
        assert!(d.decision(&Branch::IfFalse).unwrap().is_definitely_not_null());
        assert!(!d.decision(&Branch::IfTrue).unwrap().is_definitely_not_null());

        assert!(IsNullConditionDecision::for_reference_comparison((&unknown, a), (&unknown, b), true).is_none());
    }
}
