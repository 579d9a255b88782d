use jf_bytecode::refs::FieldRef;
use jf_bytecode::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a field, named after its defining class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    pub class: String,
    pub name: String,
    pub typ: Type,
}

impl FieldKey {
    #[must_use]
    pub fn new(class: &str, name: &str, typ: Type) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            typ,
        }
    }
}

impl From<&FieldRef> for FieldKey {
    fn from(field: &FieldRef) -> Self {
        Self::new(&field.class, &field.name, field.typ.clone())
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.name)
    }
}

/// A field reference after resolution in the repository.
///
/// Unresolved fields (defining class missing) are assumed mutable and
/// non-volatile.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldInfo {
    pub key: FieldKey,
    pub is_static: bool,
    pub is_final: bool,
    pub is_volatile: bool,
    pub resolved: bool,
}

impl FieldInfo {
    #[must_use]
    pub fn unresolved(field: &FieldRef, is_static: bool) -> Self {
        Self {
            key: FieldKey::from(field),
            is_static,
            is_final: false,
            is_volatile: false,
            resolved: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.key.typ.is_reference()
    }

    #[inline]
    #[must_use]
    pub fn is_wide(&self) -> bool {
        self.key.typ.is_wide()
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.key.name
    }

    #[inline]
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.key.class
    }
}

impl fmt::Display for FieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}
