//! Batch runs over a whole repository.

use crate::errors::{JfError, JfResult};
use jf_analysis::context::AnalysisContext;
use jf_analysis::driver::{analyze_methods_matching, MethodAnalyses};
use jf_analysis::typequal::TypeQualifierValue;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Options of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Number of worker threads, rayon default when unset.
    pub threads: Option<usize>,

    /// Only analyze methods of classes whose name matches.
    pub class_filter: Option<String>,

    /// Only analyze methods whose name matches.
    pub method_filter: Option<String>,
}

/// Analyzes the methods of the context repository selected by `options`,
/// checking each of the given qualifiers.
pub fn run(
    ctx: &AnalysisContext,
    options: &RunOptions,
    qualifiers: &[TypeQualifierValue],
) -> JfResult<Vec<MethodAnalyses>> {
    let class_pattern = options.class_filter.as_deref().map(Regex::new).transpose()?;
    let method_pattern = options.method_filter.as_deref().map(Regex::new).transpose()?;

    let mut builder = rayon::ThreadPoolBuilder::new();
    match options.threads {
        Some(0) => return Err(JfError::BadOptions("at least one thread is needed".to_string())),
        Some(threads) => builder = builder.num_threads(threads),
        None => (),
    }
    let pool = builder.build()?;
    log::debug!("running on {} thread(s)", pool.current_num_threads());

    let results = pool.install(|| {
        analyze_methods_matching(ctx, qualifiers, |method| {
            class_pattern
                .as_ref()
                .map_or(true, |re| re.is_match(method.class_name()))
                && method_pattern.as_ref().map_or(true, |re| re.is_match(method.name()))
        })
    });
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jf_analysis::config::AnalysisOptions;
    use jf_analysis::repo::Repo;
    use jf_bytecode::classes::{ClassDef, MethodDef, MethodFlags};
    use jf_bytecode::code::Code;
    use jf_bytecode::instrs::{Constant, Instr};

    fn repo() -> Repo {
        let flags = MethodFlags::ACC_PUBLIC | MethodFlags::ACC_STATIC;
        let body = || Code::new(0, vec![Instr::Const(Constant::Null), Instr::Throw], vec![]).unwrap();
        Repo::from_classes(vec![
            ClassDef::new("a/First")
                .with_method(MethodDef::new("fail", "()V", flags, Some(body())).unwrap())
                .with_method(MethodDef::new("other", "()V", flags, Some(body())).unwrap()),
            ClassDef::new("b/Second").with_method(MethodDef::new("fail", "()V", flags, Some(body())).unwrap()),
        ])
        .unwrap()
    }

    #[test]
    fn filters() {
        let repo = repo();
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default());

        let all = run(&ctx, &RunOptions::default(), &[]).unwrap();
        assert_eq!(all.len(), 3);

        let options = RunOptions {
            threads: Some(2),
            class_filter: Some("^a/".to_string()),
            method_filter: Some("fail".to_string()),
        };
        let some = run(&ctx, &options, &[TypeQualifierValue::nonnull()]).unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(some[0].method.class, "a/First");
        assert_eq!(some[0].can_return_normally, Some(false));
    }

    #[test]
    fn bad_options() {
        let repo = repo();
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default());
        let options = RunOptions {
            class_filter: Some("(".to_string()),
            ..RunOptions::default()
        };
        assert!(matches!(run(&ctx, &options, &[]), Err(JfError::Regex(_))));

        let options = RunOptions {
            threads: Some(0),
            ..RunOptions::default()
        };
        assert!(matches!(run(&ctx, &options, &[]), Err(JfError::BadOptions(_))));
    }
}
