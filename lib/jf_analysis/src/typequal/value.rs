use jf_bytecode::instrs::Constant;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared or inferred qualification of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum When {
    Always,
    Never,
    Maybe,
    Unknown,
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Always => "ALWAYS",
            Self::Never => "NEVER",
            Self::Maybe => "MAYBE",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Classifies the qualification of a constant value.
pub type ConstantValidator = fn(&Constant) -> When;

/// A type qualifier, optionally parameterized by a value (for instance a
/// taint kind).
///
/// Strict qualifiers must be proven on every path: values of unknown
/// origin conflict with sinks requiring them.
#[derive(Clone, Serialize, Deserialize)]
pub struct TypeQualifierValue {
    pub name: String,
    pub value: Option<String>,
    pub strict: bool,
    #[serde(skip)]
    pub validator: Option<ConstantValidator>,
}

impl TypeQualifierValue {
    #[must_use]
    pub fn new(name: &str, value: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            value: value.map(str::to_string),
            strict: false,
            validator: None,
        }
    }

    /// The nullness qualifier.
    #[must_use]
    pub fn nonnull() -> Self {
        Self::new("javax/annotation/Nonnull", None)
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: ConstantValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Key used by the annotation and summary databases.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.value {
            Some(value) => format!("{}:{value}", self.name),
            None => self.name.clone(),
        }
    }

    #[must_use]
    pub fn validate(&self, constant: &Constant) -> Option<When> {
        self.validator.map(|v| v(constant))
    }
}

impl PartialEq for TypeQualifierValue {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.strict == other.strict
    }
}

impl Eq for TypeQualifierValue {}

impl fmt::Debug for TypeQualifierValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TypeQualifierValue")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("strict", &self.strict)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl fmt::Display for TypeQualifierValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{}", self.key())?;
        if self.strict {
            write!(f, " (strict)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn untainted(constant: &Constant) -> When {
        match constant {
            Constant::Str(_) => When::Always,
            _ => When::Unknown,
        }
    }

    #[test]
    fn qualifier_keys() {
        let nonnull = TypeQualifierValue::nonnull();
        assert_eq!(nonnull.key(), "javax/annotation/Nonnull");
        assert!(!nonnull.strict);

        let tainted = TypeQualifierValue::new("a/Untainted", Some("sql"))
            .strict()
            .with_validator(untainted);
        assert_eq!(tainted.key(), "a/Untainted:sql");
        assert_eq!(format!("{tainted}"), "@a/Untainted:sql (strict)");
        assert_eq!(tainted.validate(&Constant::Str("x".into())), Some(When::Always));
        assert_eq!(nonnull.validate(&Constant::Null), None);
        assert_ne!(nonnull, tainted);
    }
}
