//! Symbolic references to fields and methods, as found in instruction
//! operands.

use crate::errors::BytecodeResult;
use crate::types::{MethodDescriptor, Type};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// Reference to a field, as written in a field access instruction.
///
/// The declaring class may be a subclass of the class actually defining
/// the field: resolution happens in the analysis repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
    pub typ: Type,
}

impl FieldRef {
    /// Builds a field reference from a descriptor string.
    pub fn new(class: &str, name: &str, descriptor: &str) -> BytecodeResult<Self> {
        Ok(Self {
            class: class.to_string(),
            name: name.to_string(),
            typ: Type::try_from(descriptor)?,
        })
    }

    #[inline]
    #[must_use]
    pub fn slots(&self) -> usize {
        self.typ.slots()
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}:{}", self.class, self.name, self.typ)
    }
}

/// Reference to a method, as written in an invoke instruction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
}

impl MethodRef {
    /// Builds a method reference from a descriptor string.
    pub fn new(class: &str, name: &str, descriptor: &str) -> BytecodeResult<Self> {
        Ok(Self {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: MethodDescriptor::try_from(descriptor)?,
        })
    }

    #[inline]
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor)
    }
}
