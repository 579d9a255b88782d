//! Batch analysis of the methods of a program.
//!
//! Methods are analyzed in parallel. Every analysis of every method is
//! independent: a failure is logged and only makes that result
//! unavailable.

use crate::context::AnalysisContext;
use crate::controlflow::Cfg;
use crate::errors::AnalysisResult;
use crate::npe::{compute_null_values, locations_where_value_becomes_null};
use crate::repo::{Method, MethodKey};
use crate::returnpath::{compute_return_paths, method_can_return_normally};
use crate::typequal::{check_method, TypeQualifierValue, Violation};
use crate::vna::compute_value_numbers;
use jf_bytecode::Addr;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnalysisKind {
    ControlFlow,
    ReturnPath,
    ValueNumbering,
    NullValues,
    TypeQualifier,
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::ControlFlow => "control flow",
            Self::ReturnPath => "return path",
            Self::ValueNumbering => "value numbering",
            Self::NullValues => "null values",
            Self::TypeQualifier => "type qualifier",
        };
        write!(f, "{name}")
    }
}

/// Results of the analyses of one method. A `None` result is
/// unavailable, the reason being kept in `failures`.
#[derive(Debug, Clone)]
pub struct MethodAnalyses {
    pub method: MethodKey,
    pub can_return_normally: Option<bool>,
    /// Locations where a value is known to be null.
    pub null_locations: Option<BTreeSet<Addr>>,
    pub violations: Vec<(TypeQualifierValue, Option<Vec<Violation>>)>,
    pub failures: BTreeMap<AnalysisKind, String>,
}

impl MethodAnalyses {
    fn new(method: MethodKey) -> Self {
        Self {
            method,
            can_return_normally: None,
            null_locations: None,
            violations: Vec::new(),
            failures: BTreeMap::new(),
        }
    }

    fn record<T>(&mut self, kind: AnalysisKind, result: AnalysisResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("{}: {kind} analysis failed: {err}", self.method);
                self.failures.entry(kind).or_insert_with(|| err.to_string());
                None
            }
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs every analysis on one method, checking each of the given
/// qualifiers.
#[must_use]
pub fn analyze_method(ctx: &AnalysisContext, method: &Method, qualifiers: &[TypeQualifierValue]) -> MethodAnalyses {
    let mut analyses = MethodAnalyses::new(method.key().clone());
    let name = method.to_string();

    let Some(cfg) = analyses.record(AnalysisKind::ControlFlow, Cfg::from_method(method)) else {
        return analyses;
    };
    analyses.can_return_normally = analyses.record(
        AnalysisKind::ReturnPath,
        compute_return_paths(&cfg, &name, ctx.options()).and_then(|df| method_can_return_normally(&df)),
    );

    let Some(vna) = analyses.record(AnalysisKind::ValueNumbering, compute_value_numbers(ctx, method, &cfg)) else {
        return analyses;
    };
    analyses.null_locations = analyses.record(
        AnalysisKind::NullValues,
        compute_null_values(&vna)
            .and_then(|df| locations_where_value_becomes_null(&df))
            .map(|locations| locations.into_iter().map(|(addr, _)| addr).collect()),
    );
    for tqv in qualifiers {
        let violations = analyses.record(AnalysisKind::TypeQualifier, check_method(&vna, tqv));
        analyses.violations.push((tqv.clone(), violations));
    }
    analyses
}

/// Analyzes in parallel all the methods of the program that have code.
#[must_use]
pub fn analyze_methods(ctx: &AnalysisContext, qualifiers: &[TypeQualifierValue]) -> Vec<MethodAnalyses> {
    analyze_methods_matching(ctx, qualifiers, |_| true)
}

/// Analyzes in parallel the methods with code accepted by `filter`.
#[must_use]
pub fn analyze_methods_matching<F>(ctx: &AnalysisContext, qualifiers: &[TypeQualifierValue], filter: F) -> Vec<MethodAnalyses>
where
    F: Fn(&Method) -> bool,
{
    let methods: Vec<Method> = ctx
        .repo()
        .iter_methods()
        .filter(|m| m.code().is_some() && filter(m))
        .collect();
    log::info!("analyzing {} methods", methods.len());

    let results: Vec<MethodAnalyses> = methods
        .par_iter()
        .map(|method| analyze_method(ctx, method, qualifiers))
        .collect();

    let failed = results.iter().filter(|r| !r.is_complete()).count();
    if failed > 0 {
        log::warn!("{failed} method(s) with unavailable results");
    }
    results
}
