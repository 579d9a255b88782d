use bitflags::bitflags;
use std::collections::BTreeMap;
use std::fmt;

bitflags! {
    /// Properties of the values a value number stands for.
    pub struct ValueFlags: u32 {
        const RETURN_VALUE          = 0x01;
        const ARRAY_VALUE           = 0x02;
        const CONSTANT_CLASS_OBJECT = 0x04;
        const PHI_NODE              = 0x08;
        const CONSTANT_VALUE        = 0x10;
    }
}

/// Identity of a set of values known to be equal.
///
/// Value numbers are only meaningful inside the analysis of one method,
/// and are created by the [`ValueNumberFactory`] of this analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueNumber {
    number: u32,
    flags: ValueFlags,
}

impl ValueNumber {
    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.number
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> ValueFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn has_flag(self, flag: ValueFlags) -> bool {
        self.flags.contains(flag)
    }

    #[inline]
    #[must_use]
    pub const fn is_phi(self) -> bool {
        self.flags.contains(ValueFlags::PHI_NODE)
    }
}

impl fmt::Display for ValueNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.number)?;
        if self.is_phi() {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// Allocates the value numbers of one analysis.
#[derive(Debug, Default)]
pub struct ValueNumberFactory {
    allocated: Vec<ValueFlags>,
    class_objects: BTreeMap<String, ValueNumber>,
}

impl ValueNumberFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_fresh_value(&mut self, flags: ValueFlags) -> ValueNumber {
        let number = self.allocated.len() as u32;
        self.allocated.push(flags);
        ValueNumber { number, flags }
    }

    /// The value standing for the `Class` object of the given class.
    pub fn class_object_value(&mut self, class_name: &str) -> ValueNumber {
        if let Some(vn) = self.class_objects.get(class_name) {
            return *vn;
        }
        let vn = self.create_fresh_value(ValueFlags::CONSTANT_CLASS_OBJECT);
        self.class_objects.insert(class_name.to_string(), vn);
        vn
    }

    /// Name of the class whose `Class` object is the given value, if any.
    #[must_use]
    pub fn class_name(&self, vn: ValueNumber) -> Option<&str> {
        self.class_objects
            .iter()
            .find(|(_, v)| **v == vn)
            .map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn for_number(&self, number: u32) -> Option<ValueNumber> {
        self.allocated
            .get(number as usize)
            .map(|flags| ValueNumber {
                number,
                flags: *flags,
            })
    }

    #[inline]
    #[must_use]
    pub fn nb_values_allocated(&self) -> usize {
        self.allocated.len()
    }
}

/// Flags of a value merging values with the given flags: only the flags
/// shared by all the inputs are kept.
#[must_use]
pub fn merge_flags(flags1: ValueFlags, flags2: ValueFlags) -> ValueFlags {
    flags1 & flags2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory() {
        let mut factory = ValueNumberFactory::new();
        let v0 = factory.create_fresh_value(ValueFlags::empty());
        let v1 = factory.create_fresh_value(ValueFlags::RETURN_VALUE);
        assert_ne!(v0, v1);
        assert!(v1.has_flag(ValueFlags::RETURN_VALUE));
        assert_eq!(factory.for_number(1), Some(v1));
        assert_eq!(factory.for_number(2), None);

        let c1 = factory.class_object_value("a/A");
        let c2 = factory.class_object_value("a/A");
        assert_eq!(c1, c2);
        assert!(c1.has_flag(ValueFlags::CONSTANT_CLASS_OBJECT));
        assert_eq!(factory.class_name(c1), Some("a/A"));
        assert_eq!(factory.nb_values_allocated(), 3);
        assert_eq!(
            merge_flags(ValueFlags::RETURN_VALUE | ValueFlags::ARRAY_VALUE, ValueFlags::RETURN_VALUE),
            ValueFlags::RETURN_VALUE
        );
    }
}
