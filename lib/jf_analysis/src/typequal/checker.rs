//! Detection of values whose known qualification conflicts with the
//! qualification required where they are consumed.

use crate::controlflow::BlockId;
use crate::errors::AnalysisResult;
use crate::typequal::backward::BackwardTypeQualifierDataflow;
use crate::typequal::flowvalue::{values_conflict, FlowValue};
use crate::typequal::forward::ForwardTypeQualifierDataflow;
use crate::typequal::sourcesink::SourceSinkInfo;
use crate::typequal::valueset::TypeQualifierValueSet;
use crate::vna::{ValueNumber, ValueNumberDataflow, ValueNumberFrame};
use jf_bytecode::Addr;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConflictSite {
    Location(Addr),
    Edge(BlockId, BlockId),
}

impl fmt::Display for ConflictSite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Location(addr) => write!(f, "@{addr}"),
            Self::Edge(source, target) => write!(f, "{} -> {}", source.index(), target.index()),
        }
    }
}

/// A value known (forward) to be `forward` where it is required
/// (backward) to be `backward`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub site: ConflictSite,
    pub vn: ValueNumber,
    pub forward: FlowValue,
    pub backward: FlowValue,
}

/// Conflicts caused by the same sinks, with the sources explaining the
/// known qualification of the values.
#[derive(Debug, Clone, Default)]
pub struct Violation {
    pub sinks: BTreeSet<SourceSinkInfo>,
    pub sources_always: BTreeSet<SourceSinkInfo>,
    pub sources_never: BTreeSet<SourceSinkInfo>,
    pub conflicts: Vec<Conflict>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "sinks:")?;
        for sink in &self.sinks {
            write!(f, " {sink}")?;
        }
        write!(f, "; sources (always):")?;
        for source in &self.sources_always {
            write!(f, " {source}")?;
        }
        write!(f, "; sources (never):")?;
        for source in &self.sources_never {
            write!(f, " {source}")?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct ViolationCollector {
    violations: BTreeMap<BTreeSet<SourceSinkInfo>, Violation>,
}

impl ViolationCollector {
    fn check(
        &mut self,
        site: ConflictSite,
        strict: bool,
        frame: &ValueNumberFrame,
        forward: &TypeQualifierValueSet,
        backward: &TypeQualifierValueSet,
    ) {
        if !frame.is_valid() || !forward.is_valid() || !backward.is_valid() {
            return;
        }
        let vns: BTreeSet<ValueNumber> = frame.slots().copied().collect();
        for vn in vns {
            let fwd = forward.value(vn);
            let bwd = backward.value(vn);
            if !values_conflict(strict, fwd, bwd) {
                continue;
            }
            log::debug!("conflict {site}: value {vn} is {fwd}, required {bwd}");
            let sinks = backward.where_value(vn).cloned().unwrap_or_default();
            let violation = self.violations.entry(sinks.clone()).or_default();
            violation.sinks = sinks;
            violation
                .sources_always
                .extend(forward.where_always(vn).into_iter().flatten().cloned());
            violation
                .sources_never
                .extend(forward.where_never(vn).into_iter().flatten().cloned());
            violation.conflicts.push(Conflict {
                site,
                vn,
                forward: fwd,
                backward: bwd,
            });
        }
    }
}

/// Compares the forward and backward facts of a qualifier at every
/// location and edge of a method.
///
/// Conflicts are grouped by the sinks requiring the conflicting
/// qualification, so that a requirement flowing back through several
/// locations gives a single violation.
pub fn check_type_qualifier(
    vna: &ValueNumberDataflow,
    forward: &ForwardTypeQualifierDataflow,
    backward: &BackwardTypeQualifierDataflow<'_, '_>,
) -> AnalysisResult<Vec<Violation>> {
    let cfg = vna.cfg();
    let strict = forward.analysis().qualifier().strict;
    let mut collector = ViolationCollector::default();

    for addr in cfg.iter_locations() {
        collector.check(
            ConflictSite::Location(addr),
            strict,
            vna.fact_at(addr)?,
            forward.fact_at(addr)?,
            backward.fact_after(addr)?,
        );
    }
    for edge in cfg.iter_edges() {
        collector.check(
            ConflictSite::Edge(edge.source, edge.target),
            strict,
            &vna.fact_on_edge(&edge)?,
            &forward.fact_on_edge(&edge)?,
            &backward.fact_on_edge(&edge)?,
        );
    }

    let violations: Vec<Violation> = collector.violations.into_values().collect();
    if !violations.is_empty() {
        log::debug!(
            "{} violation(s) of {} in {}",
            violations.len(),
            forward.analysis().qualifier(),
            vna.analysis().method()
        );
    }
    Ok(violations)
}
