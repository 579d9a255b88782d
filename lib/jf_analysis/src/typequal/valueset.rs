use crate::errors::{AnalysisError, AnalysisResult};
use crate::typequal::flowvalue::FlowValue;
use crate::typequal::sourcesink::SourceSinkInfo;
use crate::vna::ValueNumber;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Valid,
    Top,
    Bottom,
}

type WhereMap = BTreeMap<ValueNumber, BTreeSet<SourceSinkInfo>>;

/// Type qualifier dataflow fact: the qualification of every interesting
/// value number, with the sources or sinks it comes from.
///
/// Value numbers missing from the set are TOP.
#[derive(Debug, Clone)]
pub struct TypeQualifierValueSet {
    state: State,
    values: BTreeMap<ValueNumber, FlowValue>,
    where_always: WhereMap,
    where_never: WhereMap,
}

impl Default for TypeQualifierValueSet {
    fn default() -> Self {
        Self::new()
    }
}

fn add_info(map: &mut WhereMap, vn: ValueNumber, info: SourceSinkInfo) {
    map.entry(vn).or_default().insert(info);
}

fn transfer_infos(map: &mut WhereMap, from: ValueNumber, to: ValueNumber) {
    if let Some(infos) = map.remove(&from) {
        if !infos.is_empty() {
            map.entry(to).or_default().extend(infos);
        }
    }
}

fn copy_entry<V: Clone>(map: &mut BTreeMap<ValueNumber, V>, from: ValueNumber, to: ValueNumber) {
    if let Some(v) = map.get(&from).cloned() {
        map.insert(to, v);
    }
}

impl TypeQualifierValueSet {
    /// Creates a TOP set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Top,
            values: BTreeMap::new(),
            where_always: BTreeMap::new(),
            where_never: BTreeMap::new(),
        }
    }

    fn reset(&mut self, state: State) {
        self.values.clear();
        self.where_always.clear();
        self.where_never.clear();
        self.state = state;
    }

    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state == State::Valid
    }

    #[inline]
    #[must_use]
    pub fn is_top(&self) -> bool {
        self.state == State::Top
    }

    #[inline]
    #[must_use]
    pub fn is_bottom(&self) -> bool {
        self.state == State::Bottom
    }

    /// Makes the set valid and empty.
    pub fn make_valid(&mut self) {
        self.reset(State::Valid);
    }

    pub fn set_top(&mut self) {
        self.reset(State::Top);
    }

    pub fn set_bottom(&mut self) {
        self.reset(State::Bottom);
    }

    #[must_use]
    pub fn value(&self, vn: ValueNumber) -> FlowValue {
        self.values.get(&vn).copied().unwrap_or(FlowValue::Top)
    }

    fn set_value(&mut self, vn: ValueNumber, value: FlowValue) {
        if value == FlowValue::Top {
            self.prune_value(vn);
        } else {
            self.values.insert(vn, value);
        }
    }

    /// Value numbers with a (non-TOP) qualification.
    pub fn value_numbers(&self) -> impl Iterator<Item = ValueNumber> + '_ {
        self.values.keys().copied()
    }

    /// Sources or sinks justifying that the value may have the qualifier.
    #[must_use]
    pub fn where_always(&self, vn: ValueNumber) -> Option<&BTreeSet<SourceSinkInfo>> {
        self.where_always.get(&vn).filter(|s| !s.is_empty())
    }

    /// Sources or sinks justifying that the value may lack the qualifier.
    #[must_use]
    pub fn where_never(&self, vn: ValueNumber) -> Option<&BTreeSet<SourceSinkInfo>> {
        self.where_never.get(&vn).filter(|s| !s.is_empty())
    }

    /// Provenance matching the current value (ALWAYS or NEVER only).
    #[must_use]
    pub fn where_value(&self, vn: ValueNumber) -> Option<&BTreeSet<SourceSinkInfo>> {
        match self.value(vn) {
            FlowValue::Always => self.where_always(vn),
            FlowValue::Never => self.where_never(vn),
            FlowValue::Top | FlowValue::Unknown => None,
        }
    }

    /// Records a source or sink: the value takes its `when` and the record
    /// is added to every provenance set it may justify.
    pub fn model_source_sink(&mut self, info: SourceSinkInfo) {
        let vn = info.vn;
        let value = FlowValue::from_when(info.when);
        self.set_value(vn, value);
        if value.is_yes() {
            add_info(&mut self.where_always, vn, info.clone());
        }
        if value.is_no() {
            add_info(&mut self.where_never, vn, info);
        }
    }

    /// Gives `to` the qualification and provenance of `from`.
    pub fn copy_info(&mut self, from: ValueNumber, to: ValueNumber) {
        if self.is_top() {
            return;
        }
        copy_entry(&mut self.values, from, to);
        copy_entry(&mut self.where_always, from, to);
        copy_entry(&mut self.where_never, from, to);
    }

    pub fn prune_value(&mut self, vn: ValueNumber) {
        self.values.remove(&vn);
        self.where_always.remove(&vn);
        self.where_never.remove(&vn);
    }

    /// Moves everything known about `from` to the phi (or phi input) `to`.
    pub fn propagate_across_phi(&mut self, from: ValueNumber, to: ValueNumber) {
        let value = self.value(from);
        self.set_value(to, value);
        transfer_infos(&mut self.where_always, from, to);
        transfer_infos(&mut self.where_never, from, to);
        self.values.remove(&from);
    }

    /// Meets another valid set into this one.
    pub fn merge_with(&mut self, other: &Self) -> AnalysisResult<()> {
        if !self.is_valid() || !other.is_valid() {
            return Err(AnalysisError::InvalidFact(
                "merging an invalid type qualifier value set".to_string(),
            ));
        }
        let interesting: BTreeSet<ValueNumber> = self
            .values
            .keys()
            .chain(other.values.keys())
            .copied()
            .collect();
        for vn in interesting {
            let merged = self.value(vn).meet(other.value(vn));
            self.set_value(vn, merged);
        }
        for (map, other_map) in [
            (&mut self.where_always, &other.where_always),
            (&mut self.where_never, &other.where_never),
        ] {
            for (vn, infos) in other_map {
                if !infos.is_empty() {
                    map.entry(*vn).or_default().extend(infos.iter().cloned());
                }
            }
        }
        Ok(())
    }

    /// Convergence test: only the qualifications of valid sets are
    /// compared.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        if self.is_valid() && other.is_valid() {
            self.values == other.values
        } else {
            self.state == other.state
        }
    }

    fn fmt_infos(f: &mut fmt::Formatter, infos: Option<&BTreeSet<SourceSinkInfo>>) -> fmt::Result {
        write!(f, "(")?;
        for (i, info) in infos.into_iter().flatten().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", info.location)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for TypeQualifierValueSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.state {
            State::Top => return write!(f, "TOP"),
            State::Bottom => return write!(f, "BOTTOM"),
            State::Valid => (),
        }
        write!(f, "{{")?;
        let mut first = true;
        for (vn, value) in &self.values {
            if matches!(value, FlowValue::Top | FlowValue::Unknown) {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}->{value}[YES=", vn.number())?;
            Self::fmt_infos(f, self.where_always(*vn))?;
            write!(f, ",NO=")?;
            Self::fmt_infos(f, self.where_never(*vn))?;
            write!(f, "]")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typequal::sourcesink::SourceSinkKind;
    use crate::typequal::value::When;
    use crate::vna::{ValueFlags, ValueNumberFactory};
    use jf_bytecode::Addr;

    #[test]
    fn merge_and_provenance() {
        let mut factory = ValueNumberFactory::new();
        let a = factory.create_fresh_value(ValueFlags::empty());
        let b = factory.create_fresh_value(ValueFlags::empty());
        let phi = factory.create_fresh_value(ValueFlags::PHI_NODE);

        let mut left = TypeQualifierValueSet::new();
        left.make_valid();
        left.model_source_sink(SourceSinkInfo::new(SourceSinkKind::FieldLoad, Addr(1), a, When::Always));

        let mut right = TypeQualifierValueSet::new();
        right.make_valid();
        right.model_source_sink(SourceSinkInfo::new(SourceSinkKind::FieldLoad, Addr(1), a, When::Never));
        right.model_source_sink(SourceSinkInfo::new(SourceSinkKind::Parameter, Addr(0), b, When::Unknown));
        assert_eq!(right.where_always(b).map(BTreeSet::len), Some(1));
        assert_eq!(right.where_never(b).map(BTreeSet::len), Some(1));

        let mut merged = left.clone();
        merged.merge_with(&right).unwrap();
        assert_eq!(merged.value(a), FlowValue::Unknown);
        assert_eq!(merged.value(b), FlowValue::Unknown);
        assert!(merged.where_always(a).is_some() && merged.where_never(a).is_some());
        assert!(!merged.same_as(&left));
        assert!(format!("{left}").starts_with(&format!("{{{}->YES[YES=(1)", a.number())));

        merged.propagate_across_phi(a, phi);
        assert_eq!(merged.value(a), FlowValue::Top);
        assert_eq!(merged.value(phi), FlowValue::Unknown);
        assert_eq!(merged.where_always(phi).map(BTreeSet::len), Some(1));
        assert!(merged.where_always(a).is_none());

        let mut top = TypeQualifierValueSet::new();
        assert!(top.merge_with(&left).is_err());
        top.set_bottom();
        assert!(top.same_as(&TypeQualifierValueSet { state: State::Bottom, ..TypeQualifierValueSet::new() }));
    }
}
