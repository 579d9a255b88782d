//! Interprocedural summary database.
//!
//! Summaries are produced by earlier runs (or by hand for library code)
//! and only read during a batch.

use crate::repo::MethodKey;
use crate::typequal::{TypeQualifierValue, When};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Facts known about one method, usable without its code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodSummary {
    /// The method has no side effect visible from its callers.
    pub pure: bool,

    /// Inferred qualifier of the returned value, by qualifier name.
    pub return_qualifiers: BTreeMap<String, When>,

    /// Inferred qualifier required on parameters, by qualifier name and
    /// parameter index.
    pub parameter_qualifiers: BTreeMap<String, BTreeMap<usize, When>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterproceduralDatabase {
    summaries: BTreeMap<MethodKey, MethodSummary>,
}

impl InterproceduralDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, method: MethodKey, summary: MethodSummary) {
        self.summaries.insert(method, summary);
    }

    /// Summary of a method, created empty if missing.
    pub fn summary_mut(&mut self, method: MethodKey) -> &mut MethodSummary {
        self.summaries.entry(method).or_default()
    }

    #[must_use]
    pub fn get(&self, method: &MethodKey) -> Option<&MethodSummary> {
        self.summaries.get(method)
    }

    #[must_use]
    pub fn is_pure(&self, method: &MethodKey) -> bool {
        self.get(method).map_or(false, |s| s.pure)
    }

    #[must_use]
    pub fn return_value(&self, method: &MethodKey, tqv: &TypeQualifierValue) -> Option<When> {
        self.get(method)?
            .return_qualifiers
            .get(&tqv.key())
            .copied()
    }

    #[must_use]
    pub fn parameter(&self, method: &MethodKey, param: usize, tqv: &TypeQualifierValue) -> Option<When> {
        self.get(method)?
            .parameter_qualifiers
            .get(&tqv.key())?
            .get(&param)
            .copied()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}
