use crate::repo::{FieldKey, MethodKey};
use bitflags::bitflags;
use jf_bytecode::Addr;
use std::fmt;

bitflags! {
    /// Where the nullness information of a value comes from.
    pub struct NullFlags: u8 {
        /// Propagated along an exception path.
        const EXCEPTION    = 0x01;
        /// Parameter of the analyzed method.
        const PARAMETER    = 0x02;
        /// Value returned by a called method.
        const RETURN_VALUE = 0x04;
        /// Value loaded from a field.
        const FIELD_VALUE  = 0x08;
    }
}

/// Base nullness of a value, ordered as the rows of the merge matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NullKind {
    /// Definitely null.
    Null,
    /// Definitely null because of a comparison against null.
    CheckedNull,
    /// Definitely not null.
    NonNull,
    /// Definitely not null because of a comparison against null.
    CheckedNonNull,
    /// Not null because it was dereferenced without raising an exception.
    NoKaboomNonNull,
    /// Null on a simple path (at most one branch) to the current location.
    NullOnSimplePath,
    /// Unknown value (heap load, unannotated parameter...) assumed not null.
    NonReportingNonNull,
    /// Null on a complex path (at least two branches).
    NullOnComplexPath,
    /// Null on a complex path (at least three branches).
    NullOnComplexPath3,
}

use NullKind::{
    CheckedNonNull as CNN, CheckedNull as CN, NoKaboomNonNull as NK, NonNull as NN, NonReportingNonNull as NR,
    Null as N, NullOnComplexPath as NCP2, NullOnComplexPath3 as NCP3, NullOnSimplePath as NSP,
};

// Lower triangle, indexed by (greater kind, smaller kind).
const MERGE_MATRIX: [&[NullKind]; 9] = [
    &[N],
    &[N, CN],
    &[NSP, NSP, NN],
    &[NSP, NSP, NN, CNN],
    &[NSP, NSP, NN, NN, NK],
    &[NSP, NSP, NSP, NSP, NSP, NSP],
    &[NSP, NSP, NR, NR, NR, NSP, NR],
    &[NCP2, NCP2, NCP2, NCP2, NCP2, NCP2, NCP2, NCP2],
    &[NCP3, NCP3, NCP3, NCP3, NCP3, NCP3, NCP3, NCP3, NCP3],
];

/// Program element explaining a nullness value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NullOrigin {
    Parameter(usize),
    Field(FieldKey),
    ReturnValue(MethodKey),
    /// Location of the dereference that proved the value not null.
    Dereference(Addr),
}

/// Nullness of the value held by a frame slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IsNullValue {
    kind: NullKind,
    flags: NullFlags,
    origin: Option<NullOrigin>,
}

impl IsNullValue {
    const fn of_kind(kind: NullKind) -> Self {
        Self {
            kind,
            flags: NullFlags::empty(),
            origin: None,
        }
    }

    #[must_use]
    pub const fn null() -> Self {
        Self::of_kind(NullKind::Null)
    }

    #[must_use]
    pub const fn checked_null() -> Self {
        Self::of_kind(NullKind::CheckedNull)
    }

    #[must_use]
    pub const fn non_null() -> Self {
        Self::of_kind(NullKind::NonNull)
    }

    #[must_use]
    pub const fn checked_non_null() -> Self {
        Self::of_kind(NullKind::CheckedNonNull)
    }

    #[must_use]
    pub const fn null_on_simple_path() -> Self {
        Self::of_kind(NullKind::NullOnSimplePath)
    }

    /// The value of everything the analysis knows nothing about.
    #[must_use]
    pub const fn non_reporting_non_null() -> Self {
        Self::of_kind(NullKind::NonReportingNonNull)
    }

    #[must_use]
    pub const fn null_on_complex_path() -> Self {
        Self::of_kind(NullKind::NullOnComplexPath)
    }

    #[must_use]
    pub const fn null_on_complex_path3() -> Self {
        Self::of_kind(NullKind::NullOnComplexPath3)
    }

    /// A value dereferenced at `addr` without raising an exception.
    #[must_use]
    pub const fn no_kaboom_non_null(addr: Addr) -> Self {
        Self {
            kind: NullKind::NoKaboomNonNull,
            flags: NullFlags::empty(),
            origin: Some(NullOrigin::Dereference(addr)),
        }
    }

    /// Parameter declared as possibly null.
    #[must_use]
    pub const fn parameter_might_be_null(param: usize) -> Self {
        Self {
            kind: NullKind::NullOnSimplePath,
            flags: NullFlags::PARAMETER,
            origin: Some(NullOrigin::Parameter(param)),
        }
    }

    /// Parameter declared as never null.
    #[must_use]
    pub const fn parameter_non_null(param: usize) -> Self {
        Self {
            kind: NullKind::NonNull,
            flags: NullFlags::PARAMETER,
            origin: Some(NullOrigin::Parameter(param)),
        }
    }

    #[must_use]
    pub fn from_return_value_of(mut self, method: MethodKey) -> Self {
        self.flags |= NullFlags::RETURN_VALUE;
        self.origin = Some(NullOrigin::ReturnValue(method));
        self
    }

    #[must_use]
    pub fn from_field_value(mut self, field: FieldKey) -> Self {
        self.flags |= NullFlags::FIELD_VALUE;
        self.origin = Some(NullOrigin::Field(field));
        self
    }

    #[must_use]
    pub fn to_exception_value(mut self) -> Self {
        self.flags |= NullFlags::EXCEPTION;
        self
    }

    /// Null on some path values become null on complex path values after
    /// a control split.
    #[must_use]
    pub fn downgrade_on_control_split(mut self) -> Self {
        if self.kind == NullKind::NullOnSimplePath {
            self.kind = NullKind::NullOnComplexPath;
        }
        self
    }

    /// Meet of two values at a control flow merge. Flags are united; the
    /// origin is kept when both values agree on it, or when it belongs to
    /// the value whose kind is the result.
    #[must_use]
    pub fn merge(a: &Self, b: &Self) -> Self {
        if a == b {
            return a.clone();
        }
        let (hi, lo) = if a.kind >= b.kind { (a, b) } else { (b, a) };
        let mut kind = MERGE_MATRIX[hi.kind as usize][lo.kind as usize];
        if kind == NullKind::NoKaboomNonNull && a.origin != b.origin {
            kind = NullKind::NonNull;
        }
        let origin = if a.origin == b.origin {
            a.origin.clone()
        } else if kind == hi.kind && kind != lo.kind {
            hi.origin.clone()
        } else if kind == lo.kind && kind != hi.kind {
            lo.origin.clone()
        } else {
            None
        };
        Self {
            kind,
            flags: a.flags | b.flags,
            origin,
        }
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> NullKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> NullFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn origin(&self) -> Option<&NullOrigin> {
        self.origin.as_ref()
    }

    #[inline]
    #[must_use]
    pub const fn is_exception(&self) -> bool {
        self.flags.contains(NullFlags::EXCEPTION)
    }

    #[inline]
    #[must_use]
    pub const fn is_parameter(&self) -> bool {
        self.flags.contains(NullFlags::PARAMETER)
    }

    #[inline]
    #[must_use]
    pub const fn is_return_value(&self) -> bool {
        self.flags.contains(NullFlags::RETURN_VALUE)
    }

    #[inline]
    #[must_use]
    pub const fn is_field_value(&self) -> bool {
        self.flags.contains(NullFlags::FIELD_VALUE)
    }

    /// Is this value known because of an explicit null check?
    #[must_use]
    pub const fn is_checked(&self) -> bool {
        matches!(self.kind, NullKind::CheckedNull | NullKind::CheckedNonNull)
    }

    #[must_use]
    pub const fn is_definitely_null(&self) -> bool {
        matches!(self.kind, NullKind::Null | NullKind::CheckedNull)
    }

    #[must_use]
    pub const fn is_null_on_some_path(&self) -> bool {
        matches!(self.kind, NullKind::NullOnSimplePath)
    }

    #[must_use]
    pub const fn might_be_null(&self) -> bool {
        self.is_definitely_null() || self.is_null_on_some_path()
    }

    #[must_use]
    pub const fn is_definitely_not_null(&self) -> bool {
        matches!(
            self.kind,
            NullKind::NonNull | NullKind::CheckedNonNull | NullKind::NoKaboomNonNull
        )
    }

    /// Was the value proven not null by a dereference?
    #[must_use]
    pub const fn would_have_been_a_kaboom(&self) -> bool {
        matches!(self.kind, NullKind::NoKaboomNonNull)
    }
}

impl fmt::Display for IsNullValue {
    /// One character per base kind; the alternate form prefixes the flags
    /// (`e`xception, `p`arameter, `r`eturn value, `f`ield).
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            if self.flags.is_empty() {
                write!(f, "_")?;
            }
            for (flag, c) in [
                (NullFlags::EXCEPTION, 'e'),
                (NullFlags::PARAMETER, 'p'),
                (NullFlags::RETURN_VALUE, 'r'),
                (NullFlags::FIELD_VALUE, 'f'),
            ] {
                if self.flags.contains(flag) {
                    write!(f, "{c}")?;
                }
            }
        }
        let s = match self.kind {
            NullKind::Null => "n",
            NullKind::CheckedNull => "w",
            NullKind::NonNull => "N",
            NullKind::CheckedNonNull => "W",
            NullKind::NoKaboomNonNull => "K",
            NullKind::NullOnSimplePath => "s",
            NullKind::NonReportingNonNull => "-",
            NullKind::NullOnComplexPath => "/",
            NullKind::NullOnComplexPath3 => "//",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<IsNullValue> {
        vec![
            IsNullValue::null(),
            IsNullValue::checked_null(),
            IsNullValue::non_null(),
            IsNullValue::checked_non_null(),
            IsNullValue::no_kaboom_non_null(Addr(3)),
            IsNullValue::null_on_simple_path(),
            IsNullValue::non_reporting_non_null(),
            IsNullValue::null_on_complex_path(),
            IsNullValue::null_on_complex_path3(),
        ]
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        for a in all() {
            assert_eq!(IsNullValue::merge(&a, &a), a);
            for b in all() {
                assert_eq!(IsNullValue::merge(&a, &b), IsNullValue::merge(&b, &a), "{a} {b}");
            }
        }
    }

    #[test]
    fn merge_matrix() {
        let merge = |a: &IsNullValue, b: &IsNullValue| IsNullValue::merge(a, b).kind();
        assert_eq!(merge(&IsNullValue::null(), &IsNullValue::non_null()), NullKind::NullOnSimplePath);
        assert_eq!(merge(&IsNullValue::null(), &IsNullValue::checked_null()), NullKind::Null);
        assert_eq!(
            merge(&IsNullValue::checked_non_null(), &IsNullValue::non_reporting_non_null()),
            NullKind::NonReportingNonNull
        );
        assert_eq!(
            merge(&IsNullValue::null_on_complex_path(), &IsNullValue::null()),
            NullKind::NullOnComplexPath
        );
        assert_eq!(
            merge(&IsNullValue::no_kaboom_non_null(Addr(1)), &IsNullValue::no_kaboom_non_null(Addr(2))),
            NullKind::NonNull
        );
        assert_eq!(
            merge(&IsNullValue::no_kaboom_non_null(Addr(1)), &IsNullValue::checked_non_null()),
            NullKind::NonNull
        );
    }

    #[test]
    fn flags_and_origins() {
        let param = IsNullValue::parameter_might_be_null(0);
        let merged = IsNullValue::merge(&param, &IsNullValue::non_null().to_exception_value());
        assert!(merged.is_null_on_some_path());
        assert!(merged.is_parameter() && merged.is_exception());
        assert_eq!(merged.origin(), Some(&NullOrigin::Parameter(0)));

        let downgraded = merged.downgrade_on_control_split();
        assert_eq!(downgraded.kind(), NullKind::NullOnComplexPath);
        assert!(!downgraded.might_be_null());
        assert_eq!(IsNullValue::null().downgrade_on_control_split(), IsNullValue::null());
    }

    #[test]
    fn display() {
        assert_eq!(IsNullValue::null_on_simple_path().to_string(), "s");
        assert_eq!(format!("{:#}", IsNullValue::parameter_might_be_null(1).to_exception_value()), "eps");
        assert_eq!(format!("{:#}", IsNullValue::non_reporting_non_null()), "_-");
    }
}
