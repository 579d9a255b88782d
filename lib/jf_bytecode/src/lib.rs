//! Bytecode data structures consumed by the `jflow` analyses.
//!
//! The model is a JVM-like operand stack machine. Classes, methods and
//! fields are described symbolically (no constant pool), instructions are
//! addressed by their index in the method body and category-2 values
//! (`long`, `double`) occupy two slots, both on the operand stack and in
//! the local variables array.

mod addr;

pub mod classes;
pub mod code;
pub mod errors;
pub mod instrs;
pub mod refs;
pub mod types;

pub use crate::addr::Addr;
