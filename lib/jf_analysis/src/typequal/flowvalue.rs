use crate::typequal::value::When;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Qualification of one value in a type qualifier dataflow fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlowValue {
    Top,
    Always,
    Never,
    Unknown,
}

impl FlowValue {
    #[must_use]
    pub const fn from_when(when: When) -> Self {
        match when {
            When::Always => Self::Always,
            When::Never => Self::Never,
            When::Maybe | When::Unknown => Self::Unknown,
        }
    }

    /// Lattice meet: TOP is the identity, differing values give UNKNOWN.
    #[must_use]
    pub fn meet(self, other: Self) -> Self {
        match (self, other) {
            (Self::Top, v) | (v, Self::Top) => v,
            (a, b) if a == b => a,
            _ => Self::Unknown,
        }
    }

    /// May the value have the qualifier?
    #[inline]
    #[must_use]
    pub const fn is_yes(self) -> bool {
        matches!(self, Self::Always | Self::Unknown)
    }

    /// May the value lack the qualifier?
    #[inline]
    #[must_use]
    pub const fn is_no(self) -> bool {
        matches!(self, Self::Never | Self::Unknown)
    }
}

/// Do the forward (produced) and backward (required) qualifications of a
/// value conflict?
///
/// Strict qualifiers conflict whenever a known requirement is not met
/// exactly; lenient qualifiers only on an ALWAYS/NEVER clash.
#[must_use]
pub fn values_conflict(strict: bool, forward: FlowValue, backward: FlowValue) -> bool {
    if forward == FlowValue::Top || backward == FlowValue::Top || backward == FlowValue::Unknown {
        return false;
    }
    if forward == backward {
        return false;
    }
    if strict {
        return true;
    }
    matches!(
        (forward, backward),
        (FlowValue::Always, FlowValue::Never) | (FlowValue::Never, FlowValue::Always)
    )
}

impl fmt::Display for FlowValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Top => "TOP",
            Self::Always => "YES",
            Self::Never => "NO",
            Self::Unknown => "MAYBE",
        };
        write!(f, "{s}")
    }
}
