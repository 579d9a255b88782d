use crate::typequal::value::When;
use crate::vna::ValueNumber;
use jf_bytecode::instrs::Constant;
use jf_bytecode::Addr;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceSinkKind {
    // sources
    Parameter,
    ReturnValueOfCalledMethod,
    FieldLoad,
    ConstantValue,
    Other,

    // sinks
    ReturnValue,
    FieldStore,
    ArgumentToCalledMethod,
}

impl SourceSinkKind {
    #[inline]
    #[must_use]
    pub const fn is_sink(self) -> bool {
        matches!(
            self,
            Self::ReturnValue | Self::FieldStore | Self::ArgumentToCalledMethod
        )
    }
}

impl fmt::Display for SourceSinkKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Parameter => "parameter",
            Self::ReturnValueOfCalledMethod => "return value of called method",
            Self::FieldLoad => "field load",
            Self::ConstantValue => "constant value",
            Self::Other => "other",
            Self::ReturnValue => "return value",
            Self::FieldStore => "field store",
            Self::ArgumentToCalledMethod => "argument to called method",
        };
        write!(f, "{s}")
    }
}

/// A program point producing (source) or requiring (sink) a qualified
/// value.
///
/// Records are kept in the `where_always`/`where_never` sets of the
/// qualifier facts, to explain the classification of a value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceSinkInfo {
    pub kind: SourceSinkKind,
    pub location: Addr,
    pub vn: ValueNumber,
    pub when: When,

    /// Parameter index (in the descriptor) for parameter sources and
    /// argument sinks.
    pub parameter: Option<usize>,

    /// Local slot of parameter sources.
    pub local: Option<usize>,

    /// The `when` value comes from the interprocedural database rather
    /// than from a declared annotation.
    pub interproc: bool,

    /// Pushed constant of constant sources.
    pub constant: Option<Constant>,
}

impl SourceSinkInfo {
    #[must_use]
    pub const fn new(kind: SourceSinkKind, location: Addr, vn: ValueNumber, when: When) -> Self {
        Self {
            kind,
            location,
            vn,
            when,
            parameter: None,
            local: None,
            interproc: false,
            constant: None,
        }
    }

    #[must_use]
    pub const fn with_parameter(mut self, parameter: usize) -> Self {
        self.parameter = Some(parameter);
        self
    }

    #[must_use]
    pub const fn with_parameter_and_local(mut self, parameter: usize, local: usize) -> Self {
        self.parameter = Some(parameter);
        self.local = Some(local);
        self
    }

    #[must_use]
    pub const fn with_interproc(mut self, interproc: bool) -> Self {
        self.interproc = interproc;
        self
    }

    #[must_use]
    pub fn with_constant(mut self, constant: Constant) -> Self {
        self.constant = Some(constant);
        self
    }
}

impl fmt::Display for SourceSinkInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{} (vn {}, {}", self.kind, self.location, self.vn, self.when)?;
        if let Some(param) = self.parameter {
            write!(f, ", param {param}")?;
        }
        if self.interproc {
            write!(f, ", interproc")?;
        }
        write!(f, ")")
    }
}
