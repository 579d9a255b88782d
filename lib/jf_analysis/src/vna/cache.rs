use crate::vna::value::ValueNumber;
use jf_bytecode::Addr;
use std::collections::BTreeMap;

/// Outputs produced by an instruction for a given list of inputs.
///
/// Each pass of the fixpoint computation sees the same instruction with
/// the same inputs again: answering with the outputs of the previous pass
/// is what makes the value numbering converge.
#[derive(Debug, Default)]
pub struct ValueNumberCache {
    entries: BTreeMap<(Addr, Vec<ValueNumber>), Vec<ValueNumber>>,
}

impl ValueNumberCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lookup_output_values(&self, addr: Addr, inputs: &[ValueNumber]) -> Option<&[ValueNumber]> {
        self.entries
            .get(&(addr, inputs.to_vec()))
            .map(Vec::as_slice)
    }

    pub fn add_output_values(&mut self, addr: Addr, inputs: Vec<ValueNumber>, outputs: Vec<ValueNumber>) {
        self.entries.insert((addr, inputs), outputs);
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vna::value::{ValueFlags, ValueNumberFactory};

    #[test]
    fn lookup() {
        let mut factory = ValueNumberFactory::new();
        let v0 = factory.create_fresh_value(ValueFlags::empty());
        let v1 = factory.create_fresh_value(ValueFlags::empty());
        let out = factory.create_fresh_value(ValueFlags::RETURN_VALUE);

        let mut cache = ValueNumberCache::new();
        assert!(cache.is_empty());
        cache.add_output_values(Addr(3), vec![v0, v1], vec![out]);
        assert_eq!(cache.lookup_output_values(Addr(3), &[v0, v1]), Some(&[out][..]));
        assert_eq!(cache.lookup_output_values(Addr(3), &[v1, v0]), None);
        assert_eq!(cache.lookup_output_values(Addr(4), &[v0, v1]), None);
        assert_eq!(cache.len(), 1);
    }
}
