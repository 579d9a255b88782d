use jf_bytecode::classes::{ClassDef, MethodDef};
use jf_bytecode::code::Code;
use jf_bytecode::refs::MethodRef;
use jf_bytecode::types::{MethodDescriptor, Type};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a method, usable as a database key across
/// analyses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodKey {
    pub class: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
}

impl MethodKey {
    #[must_use]
    pub fn new(class: &str, name: &str, descriptor: MethodDescriptor) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            descriptor,
        }
    }
}

impl From<&MethodRef> for MethodKey {
    fn from(method: &MethodRef) -> Self {
        Self::new(&method.class, &method.name, method.descriptor.clone())
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor)
    }
}

/// A method definition together with its defining class.
#[derive(Debug, Clone)]
pub struct Method<'a> {
    class: &'a ClassDef,
    def: &'a MethodDef,
    key: MethodKey,
}

impl<'a> Method<'a> {
    pub(crate) fn new(class: &'a ClassDef, def: &'a MethodDef) -> Self {
        Self {
            class,
            def,
            key: MethodKey::new(&class.name, &def.name, def.descriptor.clone()),
        }
    }

    #[inline]
    #[must_use]
    pub const fn key(&self) -> &MethodKey {
        &self.key
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    #[inline]
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    #[inline]
    #[must_use]
    pub const fn class(&self) -> &'a ClassDef {
        self.class
    }

    #[inline]
    #[must_use]
    pub const fn def(&self) -> &'a MethodDef {
        self.def
    }

    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.def.descriptor
    }

    #[inline]
    #[must_use]
    pub fn return_type(&self) -> &Type {
        &self.def.descriptor.ret
    }

    #[inline]
    #[must_use]
    pub fn parameters_types(&self) -> &[Type] {
        &self.def.descriptor.params
    }

    #[inline]
    #[must_use]
    pub const fn code(&self) -> Option<&'a Code> {
        self.def.code.as_ref()
    }

    #[inline]
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.def.is_static()
    }

    #[inline]
    #[must_use]
    pub const fn is_abstract(&self) -> bool {
        self.def.is_abstract()
    }

    #[inline]
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.def.is_constructor()
    }
}

impl<'a> fmt::Display for Method<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}
