//! Typing informations data structures.

use crate::errors::{BytecodeError, BytecodeResult};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// Concrete type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Type {
    /// `void` type, only valid for return types.
    Void,
    /// `boolean` type.
    Boolean,
    /// `byte` type.
    Byte,
    /// `short` type.
    Short,
    /// `char` type.
    Char,
    /// `int` type.
    Int,
    /// `long` type.
    Long,
    /// `float` type.
    Float,
    /// `double` type.
    Double,
    /// Array of the given type descriptor, usable recursively for arrays of arrays,
    /// though it is invalid to have more than 255 dimensions.
    Array(usize, Box<Self>),
    /// Type of a fully-qualified class, in internal form (`java/lang/Object`).
    Class(String),
}

impl Type {
    /// Shorthand for building a class type.
    #[must_use]
    pub fn class(name: &str) -> Self {
        Self::Class(name.to_string())
    }

    /// Number of local or stack slots a value of this type occupies.
    #[inline]
    #[must_use]
    pub const fn slots(&self) -> usize {
        match self {
            Self::Void => 0,
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    #[inline]
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Array(_, _) | Self::Class(_))
    }

    /// Returns a java-like representation of the type.
    /// This method is useful for pretty-printing bytecode data. Its result differs
    /// from the `Display` implementation, which produces descriptor strings.
    #[must_use]
    pub fn to_java_string(&self) -> String {
        match self {
            Self::Void => "void".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Byte => "byte".to_string(),
            Self::Short => "short".to_string(),
            Self::Char => "char".to_string(),
            Self::Int => "int".to_string(),
            Self::Long => "long".to_string(),
            Self::Float => "float".to_string(),
            Self::Double => "double".to_string(),
            Self::Array(n, sub) => {
                let mut s = sub.to_java_string();
                for _ in 0..*n {
                    s.push_str("[]");
                }
                s
            }
            Self::Class(name) => name.replace('/', "."),
        }
    }

    pub fn as_class_name(&self) -> BytecodeResult<&str> {
        if let Self::Class(name) = self {
            Ok(name)
        } else {
            Err(BytecodeError::InvalidType)
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Void => write!(f, "V"),
            Self::Boolean => write!(f, "Z"),
            Self::Byte => write!(f, "B"),
            Self::Short => write!(f, "S"),
            Self::Char => write!(f, "C"),
            Self::Int => write!(f, "I"),
            Self::Long => write!(f, "J"),
            Self::Float => write!(f, "F"),
            Self::Double => write!(f, "D"),
            Self::Array(n, inner) => {
                for _ in 0..*n {
                    write!(f, "[")?;
                }
                write!(f, "{inner}")
            }
            Self::Class(classname) => write!(f, "L{classname};"),
        }
    }
}

fn conversion_error(s: &str, to: &str) -> BytecodeError {
    BytecodeError::Conversion {
        from: format!("&str ({s:?})"),
        to: to.to_string(),
    }
}

/// Parses one type descriptor at the start of `s`, returning the type and
/// the number of bytes consumed.
fn parse_prefix(s: &str) -> BytecodeResult<(Type, usize)> {
    let bytes = s.as_bytes();
    let mut dims = 0;
    while dims < bytes.len() && bytes[dims] == b'[' {
        dims += 1;
    }
    if dims >= bytes.len() || dims > 255 {
        return Err(conversion_error(s, "Type"));
    }

    let (base, len) = match bytes[dims] {
        b'V' if dims == 0 => (Type::Void, 1),
        b'Z' => (Type::Boolean, 1),
        b'B' => (Type::Byte, 1),
        b'S' => (Type::Short, 1),
        b'C' => (Type::Char, 1),
        b'I' => (Type::Int, 1),
        b'J' => (Type::Long, 1),
        b'F' => (Type::Float, 1),
        b'D' => (Type::Double, 1),
        b'L' => {
            let end = s[dims..]
                .find(';')
                .ok_or_else(|| conversion_error(s, "Type"))?;
            if end < 2 {
                return Err(conversion_error(s, "Type"));
            }
            (Type::Class(s[dims + 1..dims + end].to_string()), end + 1)
        }
        _ => return Err(conversion_error(s, "Type")),
    };

    if dims == 0 {
        Ok((base, len))
    } else {
        Ok((Type::Array(dims, Box::new(base)), dims + len))
    }
}

impl TryFrom<&str> for Type {
    type Error = BytecodeError;

    fn try_from(s: &str) -> BytecodeResult<Self> {
        let (typ, len) = parse_prefix(s)?;
        if len == s.len() {
            Ok(typ)
        } else {
            Err(conversion_error(s, "Type"))
        }
    }
}

/// Method prototype: parameters and return types.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl MethodDescriptor {
    #[must_use]
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self { params, ret }
    }

    /// Number of slots taken by the declared parameters (without `this`).
    #[must_use]
    pub fn params_slots(&self) -> usize {
        self.params.iter().map(Type::slots).sum()
    }

    /// Slot index of the given parameter in the callee's locals.
    #[must_use]
    pub fn param_slot(&self, param: usize, is_static: bool) -> Option<usize> {
        if param >= self.params.len() {
            return None;
        }
        let offset: usize = self.params[..param].iter().map(Type::slots).sum();
        Some(offset + usize::from(!is_static))
    }

    #[inline]
    #[must_use]
    pub fn returns_void(&self) -> bool {
        self.ret == Type::Void
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for t in &self.params {
            write!(f, "{t}")?;
        }
        write!(f, "){}", self.ret)
    }
}

impl TryFrom<&str> for MethodDescriptor {
    type Error = BytecodeError;

    fn try_from(s: &str) -> BytecodeResult<Self> {
        let inner = s
            .strip_prefix('(')
            .ok_or_else(|| conversion_error(s, "MethodDescriptor"))?;
        let close = inner
            .find(')')
            .ok_or_else(|| conversion_error(s, "MethodDescriptor"))?;

        let mut params = Vec::new();
        let mut rest = &inner[..close];
        while !rest.is_empty() {
            let (typ, len) = parse_prefix(rest)?;
            if typ == Type::Void {
                return Err(conversion_error(s, "MethodDescriptor"));
            }
            params.push(typ);
            rest = &rest[len..];
        }
        let ret = Type::try_from(&inner[close + 1..])?;
        Ok(Self { params, ret })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_descriptors() {
        assert_eq!(Type::try_from("I").unwrap(), Type::Int);
        assert_eq!(
            Type::try_from("[[Ljava/lang/String;").unwrap(),
            Type::Array(2, Box::new(Type::class("java/lang/String")))
        );
        assert!(Type::try_from("L;").is_err());
        assert!(Type::try_from("[V").is_err());
        assert!(Type::try_from("II").is_err());
        assert_eq!(format!("{}", Type::class("a/B")), "La/B;");
    }

    #[test]
    fn method_descriptor_slots() {
        let desc = MethodDescriptor::try_from("(IJLjava/lang/Object;[D)V").unwrap();
        assert_eq!(desc.params.len(), 4);
        assert_eq!(desc.params_slots(), 5);
        assert_eq!(desc.param_slot(2, true), Some(3));
        assert_eq!(desc.param_slot(2, false), Some(4));
        assert_eq!(desc.param_slot(4, false), None);
        assert!(desc.returns_void());
        assert_eq!(format!("{desc}"), "(IJLjava/lang/Object;[D)V");
        assert!(MethodDescriptor::try_from("(V)V").is_err());
        assert!(MethodDescriptor::try_from("I)V").is_err());
    }
}
