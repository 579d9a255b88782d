//! Parts shared by the forward and backward type qualifier analyses.

use crate::context::AnalysisContext;
use crate::controlflow::{Cfg, Edge};
use crate::errors::AnalysisResult;
use crate::repo::{Method, MethodKey, Repo};
use crate::typequal::sourcesink::SourceSinkInfo;
use crate::typequal::value::TypeQualifierValue;
use crate::typequal::valueset::TypeQualifierValueSet;
use crate::vna::ValueNumberDataflow;
use jf_bytecode::code::LabeledInstr;
use jf_bytecode::instrs::{Instr, InvokeKind};
use jf_bytecode::refs::MethodRef;
use jf_bytecode::Addr;
use std::collections::{BTreeMap, BTreeSet};

/// Methods returning their argument (or receiver) boxed, unboxed or
/// unchanged: the result has the qualification of the input.
#[must_use]
pub fn is_identity_function(kind: InvokeKind, called: &MethodRef) -> bool {
    if !called.class.starts_with("java/lang/") {
        return false;
    }
    let desc = &called.descriptor;
    if called.class == "java/lang/String" && !kind.is_static() {
        return desc.params.is_empty() && (called.name == "intern" || called.name == "toString");
    }
    if kind.is_static() {
        called.name == "valueOf" && desc.params.len() == 1 && !desc.params[0].is_reference()
    } else {
        let simple_name = called
            .class
            .rsplit('/')
            .next()
            .unwrap_or(called.class.as_str());
        let primitive = if simple_name == "Integer" {
            "int".to_string()
        } else {
            simple_name.to_lowercase()
        };
        desc.params.is_empty() && called.name == format!("{primitive}Value")
    }
}

/// Key under which a called method is looked up in the interprocedural
/// database.
pub(crate) fn summary_key(repo: &Repo, called: &MethodRef) -> MethodKey {
    repo.resolve_method(&called.class, &called.name, &called.descriptor)
        .map_or_else(|_| MethodKey::from(called), |m| m.key().clone())
}

#[derive(Debug)]
pub(crate) struct QualifierBase<'a> {
    pub(crate) vna: &'a ValueNumberDataflow<'a>,
    pub(crate) tqv: TypeQualifierValue,
    source_sinks: BTreeMap<Addr, BTreeSet<SourceSinkInfo>>,
}

impl<'a> QualifierBase<'a> {
    pub(crate) fn new(vna: &'a ValueNumberDataflow<'a>, tqv: TypeQualifierValue) -> Self {
        Self {
            vna,
            tqv,
            source_sinks: BTreeMap::new(),
        }
    }

    pub(crate) fn ctx(&self) -> &'a AnalysisContext<'a> {
        self.vna.analysis().context()
    }

    pub(crate) fn method(&self) -> &Method<'a> {
        self.vna.analysis().method()
    }

    pub(crate) fn cfg(&self) -> &'a Cfg {
        self.vna.cfg()
    }

    pub(crate) fn register(&mut self, info: SourceSinkInfo) {
        log::trace!("registering {info}");
        self.source_sinks
            .entry(info.location)
            .or_default()
            .insert(info);
    }

    pub(crate) fn source_sinks_at(&self, addr: Addr) -> Option<&BTreeSet<SourceSinkInfo>> {
        self.source_sinks.get(&addr)
    }

    pub(crate) fn iter_source_sinks(&self) -> impl Iterator<Item = &SourceSinkInfo> {
        self.source_sinks.values().flatten()
    }

    pub(crate) fn meet_into(
        fact: &TypeQualifierValueSet,
        result: &mut TypeQualifierValueSet,
    ) -> AnalysisResult<()> {
        if fact.is_top() || result.is_bottom() {
            return Ok(());
        }
        if fact.is_bottom() || result.is_top() {
            *result = fact.clone();
            return Ok(());
        }
        result.merge_with(fact)
    }

    /// Moves qualifications between the values of the edge source and the
    /// phi values they are merged into at the edge target.
    pub(crate) fn propagate_phis(
        &self,
        edge: &Edge,
        fact: &mut TypeQualifierValueSet,
        forward: bool,
    ) -> AnalysisResult<()> {
        if !fact.is_valid() {
            return Ok(());
        }
        let target = self.vna.start_fact(edge.target)?;
        let source = self.vna.fact_on_edge(edge)?;
        if !target.is_valid() || !source.is_valid() {
            return Ok(());
        }
        let nslots = source.num_slots().min(target.num_slots());
        for slot in 0..nslots {
            let target_vn = *target.value(slot)?;
            let source_vn = *source.value(slot)?;
            if target_vn != source_vn && target_vn.is_phi() {
                if forward {
                    fact.propagate_across_phi(source_vn, target_vn);
                } else {
                    fact.propagate_across_phi(target_vn, source_vn);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn transfer(
        &self,
        linstr: &LabeledInstr,
        fact: &mut TypeQualifierValueSet,
        forward: bool,
    ) -> AnalysisResult<()> {
        if !fact.is_valid() {
            return Ok(());
        }
        let addr = linstr.addr();
        if let Instr::Invoke(kind, called) = linstr.instr() {
            if is_identity_function(*kind, called) {
                let at = self.vna.fact_at(addr)?;
                let after = self.vna.fact_after(addr)?;
                if at.is_valid() && after.is_valid() {
                    let input = *at.top()?;
                    let output = *after.top()?;
                    if forward {
                        fact.copy_info(input, output);
                    } else {
                        fact.copy_info(output, input);
                    }
                }
                return Ok(());
            }
        }
        if let Some(infos) = self.source_sinks.get(&addr) {
            for info in infos {
                fact.model_source_sink(info.clone());
            }
        }
        Ok(())
    }
}
