//! Analysis options.

use serde::{Deserialize, Serialize};

/// Default bound on the number of passes of the dataflow engine.
pub const DEFAULT_MAX_ITERATIONS: usize = 106;

/// Options shared by all the analyses of a batch run.
///
/// Options are plain data and can be deserialized from any serde format;
/// missing fields take their default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Number of passes after which a dataflow analysis is abandoned.
    pub max_iterations: usize,

    /// Reuse value numbers of field loads that are still available.
    pub redundant_load_elimination: bool,

    /// Only kill loads of non-final fields that are written outside of a
    /// constructor somewhere in the analyzed program.
    pub field_summary: bool,

    /// Prune backward type qualifier facts that conflict with the forward
    /// facts.
    pub prune_conflicting_values: bool,

    /// Turn null and null-on-some-path values into non-reporting values
    /// after an assertion. Unsound when assertions are disabled at
    /// runtime, hence off by default.
    pub erase_null_info_after_assertions: bool,

    /// Additional assertion methods, as `class/Name.method` strings.
    pub user_assertion_methods: Vec<String>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            redundant_load_elimination: true,
            field_summary: true,
            prune_conflicting_values: true,
            erase_null_info_after_assertions: false,
            user_assertion_methods: Vec::new(),
        }
    }
}
