//! Method bodies: instructions and exception handlers table.

use crate::errors::{BytecodeError, BytecodeResult};
use crate::instrs::Instr;
use crate::Addr;
use std::fmt;

/// An instruction together with its address in the method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledInstr {
    pub(crate) addr: Addr,
    pub(crate) instr: Instr,
}

impl LabeledInstr {
    #[inline]
    #[must_use]
    pub const fn addr(&self) -> Addr {
        self.addr
    }

    #[inline]
    #[must_use]
    pub const fn instr(&self) -> &Instr {
        &self.instr
    }

    #[inline]
    #[must_use]
    pub const fn next_addr(&self) -> Addr {
        self.addr.next()
    }
}

impl fmt::Display for LabeledInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:5}: {}", self.addr, self.instr)
    }
}

/// Entry of the exception table: instructions in `[start, end)` are
/// protected, and control goes to `handler` when an exception of the
/// given class (any exception when `None`) is raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: Addr,
    pub end: Addr,
    pub handler: Addr,
    pub catch_type: Option<String>,
}

impl ExceptionHandler {
    #[must_use]
    pub fn new(start: Addr, end: Addr, handler: Addr, catch_type: Option<&str>) -> Self {
        Self {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        }
    }

    #[inline]
    #[must_use]
    pub fn covers(&self, addr: Addr) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// A method implementation.
#[derive(Debug, Clone)]
pub struct Code {
    max_locals: usize,
    instrs: Vec<LabeledInstr>,
    handlers: Vec<ExceptionHandler>,
}

impl Code {
    /// Builds a method body, checking that every branch target and
    /// handler address lies inside the body.
    pub fn new(
        max_locals: usize,
        instrs: Vec<Instr>,
        handlers: Vec<ExceptionHandler>,
    ) -> BytecodeResult<Self> {
        if instrs.is_empty() {
            return Err(BytecodeError::EmptyCode);
        }
        let len = instrs.len();
        let instrs: Vec<LabeledInstr> = instrs
            .into_iter()
            .enumerate()
            .map(|(i, instr)| LabeledInstr {
                addr: Addr(i),
                instr,
            })
            .collect();

        for linstr in &instrs {
            if let Some(target) = linstr
                .instr()
                .branch_targets()
                .into_iter()
                .find(|target| target.0 >= len)
            {
                return Err(BytecodeError::BadTarget(target));
            }
        }
        for handler in &handlers {
            if handler.start >= handler.end || handler.end.0 > len || handler.handler.0 >= len {
                return Err(BytecodeError::BadHandler(format!(
                    "[{}, {}) -> {}",
                    handler.start, handler.end, handler.handler
                )));
            }
        }
        if let Some(last) = instrs.last() {
            if last.instr().falls_through() {
                log::warn!("control flow falls off the end of the code at {}", last.addr());
            }
        }

        Ok(Self {
            max_locals,
            instrs,
            handlers,
        })
    }

    #[inline]
    #[must_use]
    pub const fn max_locals(&self) -> usize {
        self.max_locals
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn iter_instructions(&self) -> impl Iterator<Item = &LabeledInstr> {
        self.instrs.iter()
    }

    pub fn iter_handlers(&self) -> impl Iterator<Item = &ExceptionHandler> {
        self.handlers.iter()
    }

    /// Handlers protecting the given address, in table order.
    pub fn handlers_covering(&self, addr: Addr) -> impl Iterator<Item = &ExceptionHandler> {
        self.handlers.iter().filter(move |h| h.covers(addr))
    }

    pub fn instruction_at(&self, addr: Addr) -> BytecodeResult<&LabeledInstr> {
        self.instrs
            .get(addr.0)
            .ok_or(BytecodeError::InstructionNotFound(addr))
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "locals: {}", self.max_locals)?;
        for linstr in &self.instrs {
            writeln!(f, "{linstr}")?;
        }
        for h in &self.handlers {
            match &h.catch_type {
                Some(typ) => writeln!(f, "catch {typ} [{}, {}) -> {}", h.start, h.end, h.handler)?,
                None => writeln!(f, "catch * [{}, {}) -> {}", h.start, h.end, h.handler)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrs::{Cond, Constant};

    #[test]
    fn code_validation() {
        assert!(Code::new(0, vec![], vec![]).is_err());
        assert!(Code::new(0, vec![Instr::Goto(Addr(3)), Instr::ReturnVoid], vec![]).is_err());
        let handler = ExceptionHandler::new(Addr(1), Addr(1), Addr(0), None);
        assert!(Code::new(0, vec![Instr::Nop, Instr::ReturnVoid], vec![handler]).is_err());

        let code = Code::new(
            1,
            vec![
                Instr::Const(Constant::Int(0)),
                Instr::If(Cond::Eq, Addr(3)),
                Instr::Nop,
                Instr::ReturnVoid,
            ],
            vec![ExceptionHandler::new(Addr(0), Addr(2), Addr(3), Some("java/lang/Exception"))],
        )
        .unwrap();
        assert_eq!(code.len(), 4);
        assert_eq!(code.handlers_covering(Addr(1)).count(), 1);
        assert_eq!(code.handlers_covering(Addr(2)).count(), 0);
        assert_eq!(code.instruction_at(Addr(1)).unwrap().next_addr(), Addr(2));
        assert!(code.instruction_at(Addr(4)).is_err());
    }
}
