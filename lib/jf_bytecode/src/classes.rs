//! Class, method and field definitions.

use crate::code::Code;
use crate::errors::BytecodeResult;
use crate::types::{MethodDescriptor, Type};
use bitflags::bitflags;
use std::convert::TryFrom;
use std::fmt;

bitflags! {
    /// Class access flags
    pub struct ClassFlags: u32 {
        const ACC_PUBLIC                = 0x00001;
        const ACC_PRIVATE               = 0x00002;
        const ACC_PROTECTED             = 0x00004;
        const ACC_STATIC                = 0x00008;
        const ACC_FINAL                 = 0x00010;
        const ACC_INTERFACE             = 0x00200;
        const ACC_ABSTRACT              = 0x00400;
        const ACC_SYNTHETIC             = 0x01000;
        const ACC_ANNOTATION            = 0x02000;
        const ACC_ENUM                  = 0x04000;
    }
}

bitflags! {
    pub struct MethodFlags: u32 {
        const ACC_PUBLIC                = 0x00001;
        const ACC_PRIVATE               = 0x00002;
        const ACC_PROTECTED             = 0x00004;
        const ACC_STATIC                = 0x00008;
        const ACC_FINAL                 = 0x00010;
        const ACC_SYNCHRONIZED          = 0x00020;
        const ACC_BRIDGE                = 0x00040;
        const ACC_VARARGS               = 0x00080;
        const ACC_NATIVE                = 0x00100;
        const ACC_ABSTRACT              = 0x00400;
        const ACC_SYNTHETIC             = 0x01000;
    }
}

bitflags! {
    pub struct FieldFlags: u32 {
        const ACC_PUBLIC                = 0x00001;
        const ACC_PRIVATE               = 0x00002;
        const ACC_PROTECTED             = 0x00004;
        const ACC_STATIC                = 0x00008;
        const ACC_FINAL                 = 0x00010;
        const ACC_VOLATILE              = 0x00040;
        const ACC_TRANSIENT             = 0x00080;
        const ACC_SYNTHETIC             = 0x01000;
        const ACC_ENUM                  = 0x04000;
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub typ: Type,
    pub flags: FieldFlags,
}

impl FieldDef {
    pub fn new(name: &str, descriptor: &str, flags: FieldFlags) -> BytecodeResult<Self> {
        Ok(Self {
            name: name.to_string(),
            typ: Type::try_from(descriptor)?,
            flags,
        })
    }

    #[inline]
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::ACC_STATIC)
    }

    #[inline]
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.flags.contains(FieldFlags::ACC_FINAL)
    }

    #[inline]
    #[must_use]
    pub const fn is_volatile(&self) -> bool {
        self.flags.contains(FieldFlags::ACC_VOLATILE)
    }
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub flags: MethodFlags,
    pub code: Option<Code>,
}

impl MethodDef {
    pub fn new(
        name: &str,
        descriptor: &str,
        flags: MethodFlags,
        code: Option<Code>,
    ) -> BytecodeResult<Self> {
        Ok(Self {
            name: name.to_string(),
            descriptor: MethodDescriptor::try_from(descriptor)?,
            flags,
            code,
        })
    }

    #[inline]
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::ACC_STATIC)
    }

    #[inline]
    #[must_use]
    pub const fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ACC_ABSTRACT)
    }

    #[inline]
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }
}

impl fmt::Display for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub flags: ClassFlags,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    /// A public class extending `java/lang/Object`, with no members.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_class: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            flags: ClassFlags::ACC_PUBLIC,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn extends(mut self, super_class: &str) -> Self {
        self.super_class = Some(super_class.to_string());
        self
    }

    #[must_use]
    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: ClassFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    #[inline]
    #[must_use]
    pub const fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::ACC_INTERFACE)
    }

    #[must_use]
    pub fn find_method(&self, name: &str, descriptor: &MethodDescriptor) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && &m.descriptor == descriptor)
    }

    #[must_use]
    pub fn find_field(&self, name: &str, typ: &Type) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name && &f.typ == typ)
    }
}

impl fmt::Display for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
