//! Recognition of assertion methods.
//!
//! A call to an assertion method does not return normally when its check
//! fails, so values tested just before it are known to be safe afterwards.
//! Methods are recognized by name, with a user supplied list on top.

use jf_bytecode::code::Code;
use jf_bytecode::instrs::{Constant, Instr, InvokeKind};
use jf_bytecode::refs::{FieldRef, MethodRef};
use jf_bytecode::types::Type;
use jf_bytecode::Addr;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    // Matched against the lowercase method name.
    static ref ASSERTION_NAME: Regex =
        Regex::new(r"^(throw|fail|fatal)|assert|legal|error|abort|^(insist|usage|exit)$")
            .expect("failed to compile assertion name regex");
    static ref CASE_SENSITIVE_NAME: Regex =
        Regex::new(r"^(affirm|panic|logAndThrow)|^logTerminal$")
            .expect("failed to compile assertion name regex");
}

/// Static loads of logging levels that only precede fatal paths.
const FATAL_LEVELS: &[(&str, &str)] = &[
    ("java/util/logging/Level", "SEVERE"),
    ("org/apache/log4j/Level", "ERROR"),
    ("org/apache/log4j/Level", "FATAL"),
];

/// Is the field one of the logging levels only used on fatal paths?
#[must_use]
pub fn is_fatal_logging_level(field: &FieldRef) -> bool {
    FATAL_LEVELS
        .iter()
        .any(|(class, name)| field.class == *class && field.name == *name)
}

#[derive(Debug, Clone, Default)]
pub struct AssertionMethods {
    user_methods: BTreeSet<(String, String)>,
}

impl AssertionMethods {
    /// Builds the recognizer with additional `class/Name.method` entries.
    /// Malformed entries are skipped.
    #[must_use]
    pub fn new(user_methods: &[String]) -> Self {
        let user_methods = user_methods
            .iter()
            .filter_map(|name| match name.rsplit_once('.') {
                Some((class, method)) if !class.is_empty() && !method.is_empty() => {
                    Some((class.to_string(), method.to_string()))
                }
                _ => {
                    log::warn!("ignoring malformed assertion method name {name:?}");
                    None
                }
            })
            .collect();
        Self { user_methods }
    }

    #[must_use]
    pub fn is_assertion_method(&self, method: &MethodRef) -> bool {
        if self
            .user_methods
            .contains(&(method.class.clone(), method.name.clone()))
        {
            return true;
        }
        if method.name == "addOrThrowException" {
            return true;
        }
        if method.class.ends_with("Assert") && method.name.starts_with("is") {
            return true;
        }
        let ret = &method.descriptor.ret;
        if *ret != Type::Void && *ret != Type::Boolean {
            return false;
        }
        method.class.to_lowercase().contains("assert")
            || ASSERTION_NAME.is_match(&method.name.to_lowercase())
            || CASE_SENSITIVE_NAME.is_match(&method.name)
    }

    /// Is the instruction an assertion call, or a load of a fatal logging
    /// level?
    #[must_use]
    pub fn is_assertion_instr(&self, instr: &Instr) -> bool {
        match instr {
            Instr::Invoke(_, method) => self.is_assertion_method(method),
            Instr::GetStatic(field) => is_fatal_logging_level(field),
            _ => false,
        }
    }

    /// Same as [`Self::is_assertion_instr`], also recognizing
    /// `response.setStatus(500)` on servlet responses.
    #[must_use]
    pub fn is_assertion_at(&self, code: &Code, addr: Addr) -> bool {
        let Ok(linstr) = code.instruction_at(addr) else {
            return false;
        };
        if self.is_assertion_instr(linstr.instr()) {
            return true;
        }
        if linstr.instr() != &Instr::Const(Constant::Int(500)) {
            return false;
        }
        matches!(
            code.instruction_at(linstr.next_addr()).map(|next| next.instr()),
            Ok(Instr::Invoke(InvokeKind::Interface, m))
                if m.class == "javax/servlet/http/HttpServletResponse" && m.name == "setStatus"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn method(class: &str, name: &str, desc: &str) -> MethodRef {
        MethodRef::new(class, name, desc).unwrap()
    }

    #[test]
    fn assertion_names() {
        let am = AssertionMethods::new(&["a/Checks.verify".to_string(), "bogus".to_string()]);
        assert!(am.is_assertion_method(&method("a/Checks", "verify", "(Ljava/lang/Object;)Ljava/lang/Object;")));
        assert!(am.is_assertion_method(&method("org/junit/Assert", "assertNotNull", "(Ljava/lang/Object;)V")));
        assert!(am.is_assertion_method(&method("a/Util", "failIfNull", "(Ljava/lang/Object;)V")));
        assert!(am.is_assertion_method(&method("a/Util", "checkArgumentLegal", "(Z)Z")));
        assert!(am.is_assertion_method(&method("a/Util", "panicNow", "()V")));
        assert!(am.is_assertion_method(&method("a/MyAssert", "isTrue", "(Z)I")));
        assert!(!am.is_assertion_method(&method("a/Util", "panicNow", "()I")));
        assert!(!am.is_assertion_method(&method("a/Util", "PanicNow", "()V")));
        assert!(!am.is_assertion_method(&method("a/Util", "exits", "()V")));
        assert!(!am.is_assertion_method(&method("a/Util", "compute", "()V")));
    }

    #[test]
    fn assertion_instructions() {
        let am = AssertionMethods::default();
        let code = testing::code(
            2,
            vec![
                Instr::GetStatic(testing::field_ref("java/util/logging/Level", "SEVERE", "Ljava/util/logging/Level;")),
                Instr::Stack(jf_bytecode::instrs::StackOp::Pop),
                Instr::Load(jf_bytecode::instrs::Kind::Ref, 1),
                Instr::Const(Constant::Int(500)),
                testing::invoke(
                    InvokeKind::Interface,
                    "javax/servlet/http/HttpServletResponse",
                    "setStatus",
                    "(I)V",
                ),
                Instr::ReturnVoid,
            ],
        );
        assert!(am.is_assertion_at(&code, Addr(0)));
        assert!(!am.is_assertion_at(&code, Addr(1)));
        assert!(am.is_assertion_at(&code, Addr(3)));
        assert!(!am.is_assertion_at(&code, Addr(4)));
        assert!(!am.is_assertion_at(&code, Addr(42)));
    }
}
