//! Fixtures building small programs for the analyses tests.

use crate::repo::Repo;
use jf_bytecode::classes::{ClassDef, FieldDef, FieldFlags, MethodDef, MethodFlags};
use jf_bytecode::code::{Code, ExceptionHandler};
use jf_bytecode::instrs::{Instr, InvokeKind};
use jf_bytecode::refs::{FieldRef, MethodRef};

pub fn code(max_locals: usize, instrs: Vec<Instr>) -> Code {
    Code::new(max_locals, instrs, vec![]).unwrap()
}

pub fn code_with_handlers(max_locals: usize, instrs: Vec<Instr>, handlers: Vec<ExceptionHandler>) -> Code {
    Code::new(max_locals, instrs, handlers).unwrap()
}

pub fn method(name: &str, descriptor: &str, flags: MethodFlags, code: Code) -> MethodDef {
    MethodDef::new(name, descriptor, flags, Some(code)).unwrap()
}

pub fn abstract_method(name: &str, descriptor: &str) -> MethodDef {
    MethodDef::new(name, descriptor, MethodFlags::ACC_PUBLIC | MethodFlags::ACC_ABSTRACT, None).unwrap()
}

pub fn field(name: &str, descriptor: &str, flags: FieldFlags) -> FieldDef {
    FieldDef::new(name, descriptor, flags).unwrap()
}

pub fn field_ref(class: &str, name: &str, descriptor: &str) -> FieldRef {
    FieldRef::new(class, name, descriptor).unwrap()
}

pub fn invoke(kind: InvokeKind, class: &str, name: &str, descriptor: &str) -> Instr {
    Instr::Invoke(kind, MethodRef::new(class, name, descriptor).unwrap())
}

pub fn repo(classes: Vec<ClassDef>) -> Repo {
    Repo::from_classes(classes).unwrap()
}
