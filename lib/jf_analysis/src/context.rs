//! State shared by the analyses of a batch run.

use crate::annotations::AnnotationDatabase;
use crate::assertions::AssertionMethods;
use crate::config::AnalysisOptions;
use crate::fields::FieldSummary;
use crate::repo::Repo;
use crate::summary::InterproceduralDatabase;

/// Read-only context of a batch run.
///
/// Everything in the context is computed before the methods are analyzed,
/// so that it can be shared by the worker threads.
#[derive(Debug)]
pub struct AnalysisContext<'r> {
    repo: &'r Repo,
    options: AnalysisOptions,
    field_summary: FieldSummary,
    annotations: AnnotationDatabase,
    interproc: InterproceduralDatabase,
    assertions: AssertionMethods,
}

impl<'r> AnalysisContext<'r> {
    #[must_use]
    pub fn new(repo: &'r Repo, options: AnalysisOptions) -> Self {
        let field_summary = if options.field_summary {
            FieldSummary::compute(repo)
        } else {
            FieldSummary::default()
        };
        let assertions = AssertionMethods::new(&options.user_assertion_methods);
        Self {
            repo,
            options,
            field_summary,
            annotations: AnnotationDatabase::default(),
            interproc: InterproceduralDatabase::default(),
            assertions,
        }
    }

    #[must_use]
    pub fn with_annotations(mut self, annotations: AnnotationDatabase) -> Self {
        self.annotations = annotations;
        self
    }

    #[must_use]
    pub fn with_interproc(mut self, interproc: InterproceduralDatabase) -> Self {
        self.interproc = interproc;
        self
    }

    #[inline]
    #[must_use]
    pub const fn repo(&self) -> &'r Repo {
        self.repo
    }

    #[inline]
    #[must_use]
    pub const fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Summary of field writes, only meaningful when the `field_summary`
    /// option is set.
    #[inline]
    #[must_use]
    pub fn field_summary(&self) -> Option<&FieldSummary> {
        self.options.field_summary.then_some(&self.field_summary)
    }

    #[inline]
    #[must_use]
    pub const fn annotations(&self) -> &AnnotationDatabase {
        &self.annotations
    }

    #[inline]
    #[must_use]
    pub const fn interproc(&self) -> &InterproceduralDatabase {
        &self.interproc
    }

    #[inline]
    #[must_use]
    pub const fn assertions(&self) -> &AssertionMethods {
        &self.assertions
    }
}
