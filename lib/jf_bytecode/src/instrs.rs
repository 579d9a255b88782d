//! Instruction set.
//!
//! The instruction set is a closed enumeration: analyses match on it
//! exhaustively, so adding a variant is a compile error until every
//! transfer function handles it.

use crate::refs::{FieldRef, MethodRef};
use crate::types::Type;
use crate::Addr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Computational kind of a value held in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl Kind {
    /// Number of slots taken by a value of this kind.
    #[inline]
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Long | Self::Double => 2,
            Self::Int | Self::Float | Self::Ref => 1,
        }
    }

    /// Computational kind of a declared type (`None` for `void`).
    #[must_use]
    pub const fn of(typ: &Type) -> Option<Self> {
        match typ {
            Type::Void => None,
            Type::Boolean | Type::Byte | Type::Short | Type::Char | Type::Int => Some(Self::Int),
            Type::Long => Some(Self::Long),
            Type::Float => Some(Self::Float),
            Type::Double => Some(Self::Double),
            Type::Array(_, _) | Type::Class(_) => Some(Self::Ref),
        }
    }

    const fn prefix(self) -> char {
        match self {
            Self::Int => 'i',
            Self::Long => 'l',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Ref => 'a',
        }
    }
}

/// Constant operand of a constant push instruction.
///
/// Floating point constants are stored as raw bits so that constants can
/// be hashed and compared structurally.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Str(String),
    Class(Type),
}

impl Constant {
    #[must_use]
    pub fn float(value: f32) -> Self {
        Self::Float(value.to_bits())
    }

    #[must_use]
    pub fn double(value: f64) -> Self {
        Self::Double(value.to_bits())
    }

    #[must_use]
    pub const fn kind(&self) -> Kind {
        match self {
            Self::Int(_) => Kind::Int,
            Self::Long(_) => Kind::Long,
            Self::Float(_) => Kind::Float,
            Self::Double(_) => Kind::Double,
            Self::Null | Self::Str(_) | Self::Class(_) => Kind::Ref,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Long(l) => write!(f, "{l}L"),
            Self::Float(bits) => write!(f, "{}f", f32::from_bits(*bits)),
            Self::Double(bits) => write!(f, "{}d", f64::from_bits(*bits)),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Class(typ) => write!(f, "{typ}.class"),
        }
    }
}

/// Comparison of conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Cond {
    #[must_use]
    pub const fn eval(self, lhs: i32, rhs: i32) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Gt => lhs > rhs,
            Self::Le => lhs <= rhs,
        }
    }

    const fn suffix(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Ge => "ge",
            Self::Gt => "gt",
            Self::Le => "le",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

impl ArithOp {
    #[inline]
    #[must_use]
    pub const fn is_shift(self) -> bool {
        matches!(self, Self::Shl | Self::Shr | Self::Ushr)
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Ushr => "ushr",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
        }
    }
}

/// Operand stack manipulation, working on untyped words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackOp {
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
}

impl StackOp {
    /// Words consumed and produced by the operation.
    #[must_use]
    pub const fn effect(self) -> (usize, usize) {
        match self {
            Self::Pop => (1, 0),
            Self::Pop2 => (2, 0),
            Self::Dup => (1, 2),
            Self::DupX1 => (2, 3),
            Self::DupX2 => (3, 4),
            Self::Dup2 => (2, 4),
            Self::Dup2X1 => (3, 5),
            Self::Dup2X2 => (4, 6),
            Self::Swap => (2, 2),
        }
    }

    /// Result of the operation, from the bottom-most consumed word to the
    /// new top of stack, expressed as indices into the consumed words (0 is
    /// the bottom-most consumed word).
    #[must_use]
    pub const fn permutation(self) -> &'static [usize] {
        match self {
            Self::Pop | Self::Pop2 => &[],
            Self::Dup => &[0, 0],
            Self::DupX1 => &[1, 0, 1],
            Self::DupX2 => &[2, 0, 1, 2],
            Self::Dup2 => &[0, 1, 0, 1],
            Self::Dup2X1 => &[1, 2, 0, 1, 2],
            Self::Dup2X2 => &[2, 3, 0, 1, 2, 3],
            Self::Swap => &[1, 0],
        }
    }

    const fn mnemonic(self) -> &'static str {
        match self {
            Self::Pop => "pop",
            Self::Pop2 => "pop2",
            Self::Dup => "dup",
            Self::DupX1 => "dup_x1",
            Self::DupX2 => "dup_x2",
            Self::Dup2 => "dup2",
            Self::Dup2X1 => "dup2_x1",
            Self::Dup2X2 => "dup2_x2",
            Self::Swap => "swap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl InvokeKind {
    #[inline]
    #[must_use]
    pub const fn is_static(self) -> bool {
        matches!(self, Self::Static)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instr {
    Nop,
    /// Push a constant (`aconst_null`, `iconst_*`, `ldc`, ...).
    Const(Constant),
    Load(Kind, u16),
    Store(Kind, u16),
    Iinc(u16, i32),
    Stack(StackOp),
    Arith(ArithOp, Kind),
    Neg(Kind),
    Convert(Kind, Kind),
    /// `lcmp`, `fcmp*`, `dcmp*`.
    Compare(Kind),
    /// Compare an int against zero.
    If(Cond, Addr),
    /// Compare two ints.
    IfCmp(Cond, Addr),
    IfNull(Addr),
    IfNonNull(Addr),
    IfAcmpEq(Addr),
    IfAcmpNe(Addr),
    Goto(Addr),
    /// Table or lookup switch: `(key, target)` cases and default target.
    Switch(Vec<(i32, Addr)>, Addr),
    Return(Kind),
    ReturnVoid,
    GetField(FieldRef),
    PutField(FieldRef),
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    Invoke(InvokeKind, MethodRef),
    New(String),
    /// One dimension array of the given element type.
    NewArray(Type),
    /// Array of the given array type with the given number of dimensions
    /// popped from the stack.
    MultiNewArray(Type, u8),
    ArrayLength,
    ArrayLoad(Kind),
    ArrayStore(Kind),
    Throw,
    CheckCast(Type),
    InstanceOf(Type),
    MonitorEnter,
    MonitorExit,
}

impl Instr {
    /// Number of stack words popped by the instruction.
    #[must_use]
    pub fn consumed(&self) -> usize {
        match self {
            Self::Nop
            | Self::Const(_)
            | Self::Load(_, _)
            | Self::Iinc(_, _)
            | Self::Goto(_)
            | Self::ReturnVoid
            | Self::GetStatic(_)
            | Self::New(_) => 0,
            Self::Store(kind, _) | Self::Return(kind) | Self::Neg(kind) | Self::Convert(kind, _) => {
                kind.width()
            }
            Self::Stack(op) => op.effect().0,
            Self::Arith(op, kind) => {
                if op.is_shift() {
                    kind.width() + 1
                } else {
                    2 * kind.width()
                }
            }
            Self::Compare(kind) => 2 * kind.width(),
            Self::If(_, _)
            | Self::IfNull(_)
            | Self::IfNonNull(_)
            | Self::Switch(_, _)
            | Self::GetField(_)
            | Self::NewArray(_)
            | Self::ArrayLength
            | Self::Throw
            | Self::CheckCast(_)
            | Self::InstanceOf(_)
            | Self::MonitorEnter
            | Self::MonitorExit => 1,
            Self::IfCmp(_, _) | Self::IfAcmpEq(_) | Self::IfAcmpNe(_) | Self::ArrayLoad(_) => 2,
            Self::PutField(field) => 1 + field.slots(),
            Self::PutStatic(field) => field.slots(),
            Self::Invoke(kind, method) => {
                method.descriptor.params_slots() + usize::from(!kind.is_static())
            }
            Self::MultiNewArray(_, dims) => usize::from(*dims),
            Self::ArrayStore(kind) => 2 + kind.width(),
        }
    }

    /// Number of stack words pushed by the instruction.
    #[must_use]
    pub fn produced(&self) -> usize {
        match self {
            Self::Nop
            | Self::Store(_, _)
            | Self::Iinc(_, _)
            | Self::If(_, _)
            | Self::IfCmp(_, _)
            | Self::IfNull(_)
            | Self::IfNonNull(_)
            | Self::IfAcmpEq(_)
            | Self::IfAcmpNe(_)
            | Self::Goto(_)
            | Self::Switch(_, _)
            | Self::Return(_)
            | Self::ReturnVoid
            | Self::PutField(_)
            | Self::PutStatic(_)
            | Self::ArrayStore(_)
            | Self::Throw
            | Self::MonitorEnter
            | Self::MonitorExit => 0,
            Self::Const(c) => c.kind().width(),
            Self::Load(kind, _) | Self::Arith(_, kind) | Self::Neg(kind) | Self::ArrayLoad(kind) => {
                kind.width()
            }
            Self::Convert(_, kind) => kind.width(),
            Self::Stack(op) => op.effect().1,
            Self::Compare(_)
            | Self::New(_)
            | Self::NewArray(_)
            | Self::MultiNewArray(_, _)
            | Self::ArrayLength
            | Self::CheckCast(_)
            | Self::InstanceOf(_) => 1,
            Self::GetField(field) | Self::GetStatic(field) => field.slots(),
            Self::Invoke(_, method) => method.descriptor.ret.slots(),
        }
    }

    /// Can this instruction raise an exception?
    #[must_use]
    pub fn can_throw(&self) -> bool {
        match self {
            Self::Arith(ArithOp::Div | ArithOp::Rem, Kind::Int | Kind::Long) => true,
            Self::Invoke(_, _)
            | Self::NewArray(_)
            | Self::MultiNewArray(_, _)
            | Self::ArrayLength
            | Self::ArrayLoad(_)
            | Self::ArrayStore(_)
            | Self::Throw
            | Self::CheckCast(_)
            | Self::InstanceOf(_)
            | Self::New(_)
            | Self::GetField(_)
            | Self::PutField(_)
            | Self::GetStatic(_)
            | Self::PutStatic(_)
            | Self::MonitorEnter
            | Self::MonitorExit => true,
            _ => false,
        }
    }

    /// Explicit branch targets of the instruction.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<Addr> {
        match self {
            Self::If(_, a)
            | Self::IfCmp(_, a)
            | Self::IfNull(a)
            | Self::IfNonNull(a)
            | Self::IfAcmpEq(a)
            | Self::IfAcmpNe(a)
            | Self::Goto(a) => vec![*a],
            Self::Switch(cases, default) => cases
                .iter()
                .map(|(_, a)| *a)
                .chain(std::iter::once(*default))
                .collect(),
            _ => Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_return(&self) -> bool {
        matches!(self, Self::Return(_) | Self::ReturnVoid)
    }

    #[inline]
    #[must_use]
    pub fn is_conditional_branch(&self) -> bool {
        matches!(
            self,
            Self::If(_, _)
                | Self::IfCmp(_, _)
                | Self::IfNull(_)
                | Self::IfNonNull(_)
                | Self::IfAcmpEq(_)
                | Self::IfAcmpNe(_)
        )
    }

    /// Does control continue with the next instruction (possibly among
    /// other successors)?
    #[must_use]
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Self::Goto(_) | Self::Switch(_, _) | Self::Return(_) | Self::ReturnVoid | Self::Throw
        )
    }

    #[must_use]
    pub fn mnemonic(&self) -> String {
        match self {
            Self::Nop => "nop".to_string(),
            Self::Const(Constant::Null) => "aconst_null".to_string(),
            Self::Const(Constant::Str(_) | Constant::Class(_)) => "ldc".to_string(),
            Self::Const(c) => format!("{}const", c.kind().prefix()),
            Self::Load(kind, _) => format!("{}load", kind.prefix()),
            Self::Store(kind, _) => format!("{}store", kind.prefix()),
            Self::Iinc(_, _) => "iinc".to_string(),
            Self::Stack(op) => op.mnemonic().to_string(),
            Self::Arith(op, kind) => format!("{}{}", kind.prefix(), op.name()),
            Self::Neg(kind) => format!("{}neg", kind.prefix()),
            Self::Convert(from, to) => format!("{}2{}", from.prefix(), to.prefix()),
            Self::Compare(kind) => format!("{}cmp", kind.prefix()),
            Self::If(cond, _) => format!("if{}", cond.suffix()),
            Self::IfCmp(cond, _) => format!("if_icmp{}", cond.suffix()),
            Self::IfNull(_) => "ifnull".to_string(),
            Self::IfNonNull(_) => "ifnonnull".to_string(),
            Self::IfAcmpEq(_) => "if_acmpeq".to_string(),
            Self::IfAcmpNe(_) => "if_acmpne".to_string(),
            Self::Goto(_) => "goto".to_string(),
            Self::Switch(_, _) => "switch".to_string(),
            Self::Return(kind) => format!("{}return", kind.prefix()),
            Self::ReturnVoid => "return".to_string(),
            Self::GetField(_) => "getfield".to_string(),
            Self::PutField(_) => "putfield".to_string(),
            Self::GetStatic(_) => "getstatic".to_string(),
            Self::PutStatic(_) => "putstatic".to_string(),
            Self::Invoke(InvokeKind::Virtual, _) => "invokevirtual".to_string(),
            Self::Invoke(InvokeKind::Special, _) => "invokespecial".to_string(),
            Self::Invoke(InvokeKind::Static, _) => "invokestatic".to_string(),
            Self::Invoke(InvokeKind::Interface, _) => "invokeinterface".to_string(),
            Self::New(_) => "new".to_string(),
            Self::NewArray(_) => "newarray".to_string(),
            Self::MultiNewArray(_, _) => "multianewarray".to_string(),
            Self::ArrayLength => "arraylength".to_string(),
            Self::ArrayLoad(kind) => format!("{}aload", kind.prefix()),
            Self::ArrayStore(kind) => format!("{}astore", kind.prefix()),
            Self::Throw => "athrow".to_string(),
            Self::CheckCast(_) => "checkcast".to_string(),
            Self::InstanceOf(_) => "instanceof".to_string(),
            Self::MonitorEnter => "monitorenter".to_string(),
            Self::MonitorExit => "monitorexit".to_string(),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match self {
            Self::Const(Constant::Null) => Ok(()),
            Self::Const(c) => write!(f, " {c}"),
            Self::Load(_, idx) | Self::Store(_, idx) => write!(f, " {idx}"),
            Self::Iinc(idx, inc) => write!(f, " {idx} {inc}"),
            Self::If(_, a)
            | Self::IfCmp(_, a)
            | Self::IfNull(a)
            | Self::IfNonNull(a)
            | Self::IfAcmpEq(a)
            | Self::IfAcmpNe(a)
            | Self::Goto(a) => write!(f, " @{a}"),
            Self::Switch(cases, default) => {
                for (key, target) in cases {
                    write!(f, " {key}:@{target}")?;
                }
                write!(f, " _:@{default}")
            }
            Self::GetField(field)
            | Self::PutField(field)
            | Self::GetStatic(field)
            | Self::PutStatic(field) => write!(f, " {field}"),
            Self::Invoke(_, method) => write!(f, " {method}"),
            Self::New(class) => write!(f, " {class}"),
            Self::NewArray(typ) | Self::CheckCast(typ) | Self::InstanceOf(typ) => {
                write!(f, " {typ}")
            }
            Self::MultiNewArray(typ, dims) => write!(f, " {typ} {dims}"),
            _ => Ok(()),
        }
    }
}
