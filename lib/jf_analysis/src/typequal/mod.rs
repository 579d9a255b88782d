//! Type qualifier inference.
//!
//! A type qualifier (nullness, taint, or any annotation-declared property)
//! is inferred by two cooperating dataflow analyses over value numbers:
//! the forward analysis tracks the qualification of values from the places
//! producing them, the backward analysis tracks the qualification required
//! by the places consuming them. Both keep, for every value, the sources or
//! sinks justifying its qualification. The [`checker`] reports the values
//! whose known and required qualifications conflict.

mod backward;
mod base;
pub mod checker;
mod flowvalue;
mod forward;
mod sourcesink;
mod value;
mod valueset;

pub use backward::{compute_backward, BackwardTypeQualifierAnalysis, BackwardTypeQualifierDataflow};
pub use base::is_identity_function;
pub use checker::{check_type_qualifier, Conflict, ConflictSite, Violation};
pub use flowvalue::{values_conflict, FlowValue};
pub use forward::{compute_forward, ForwardTypeQualifierAnalysis, ForwardTypeQualifierDataflow};
pub use sourcesink::{SourceSinkInfo, SourceSinkKind};
pub use value::{ConstantValidator, TypeQualifierValue, When};
pub use valueset::TypeQualifierValueSet;

use crate::errors::AnalysisResult;
use crate::vna::ValueNumberDataflow;

/// Runs both analyses of a qualifier on a method and reports the
/// violations.
pub fn check_method<'a>(vna: &'a ValueNumberDataflow<'a>, tqv: &TypeQualifierValue) -> AnalysisResult<Vec<Violation>> {
    let forward = compute_forward(vna, tqv)?;
    let backward = compute_backward(vna, Some(&forward), tqv)?;
    check_type_qualifier(vna, &forward, &backward)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{AnnotationDatabase, AnnotationTarget};
    use crate::config::AnalysisOptions;
    use crate::context::AnalysisContext;
    use crate::controlflow::Cfg;
    use crate::repo::Repo;
    use crate::testing;
    use crate::vna::compute_value_numbers;
    use jf_bytecode::classes::{ClassDef, FieldFlags, MethodFlags};
    use jf_bytecode::instrs::{Cond, Constant, Instr, InvokeKind, Kind};
    use jf_bytecode::Addr;

    const OBJECT: &str = "Ljava/lang/Object;";

    // static Object m(Object p, int cond) {
    //     Object x = T.f;
    //     if (cond != 0) x = p;
    //     return T.requiresNonNull(x);
    // }
    fn program(cond: Instr) -> Repo {
        let body = vec![
            Instr::GetStatic(testing::field_ref("a/T", "f", OBJECT)),
            Instr::Store(Kind::Ref, 2),
            cond,
            Instr::If(Cond::Eq, Addr(6)),
            Instr::Load(Kind::Ref, 0),
            Instr::Store(Kind::Ref, 2),
            Instr::Load(Kind::Ref, 2),
            testing::invoke(
                InvokeKind::Static,
                "a/T",
                "requiresNonNull",
                "(Ljava/lang/Object;)Ljava/lang/Object;",
            ),
            Instr::Return(Kind::Ref),
        ];
        let static_public = MethodFlags::ACC_PUBLIC | MethodFlags::ACC_STATIC;
        testing::repo(vec![ClassDef::new("a/T")
            .with_field(testing::field("f", OBJECT, FieldFlags::ACC_STATIC))
            .with_method(testing::method(
                "requiresNonNull",
                "(Ljava/lang/Object;)Ljava/lang/Object;",
                static_public,
                testing::code(1, vec![Instr::Load(Kind::Ref, 0), Instr::Return(Kind::Ref)]),
            ))
            .with_method(testing::method(
                "m",
                "(Ljava/lang/Object;I)Ljava/lang/Object;",
                static_public,
                testing::code(3, body),
            ))])
    }

    fn annotations(repo: &Repo, tqv: &TypeQualifierValue, param_when: Option<When>) -> AnnotationDatabase {
        let mut db = AnnotationDatabase::new();
        let field = repo.field_info(&testing::field_ref("a/T", "f", OBJECT), true);
        db.add(AnnotationTarget::Field(field.key), tqv, When::Always);
        let method = |name: &str| repo.iter_methods().find(|m| m.name() == name).unwrap();
        db.add(
            AnnotationTarget::Parameter(method("requiresNonNull").key().clone(), 0),
            tqv,
            When::Always,
        );
        if let Some(when) = param_when {
            db.add(AnnotationTarget::Parameter(method("m").key().clone(), 0), tqv, when);
        }
        db
    }

    fn violations(repo: &Repo, ctx: &AnalysisContext, tqv: &TypeQualifierValue, prune: bool) -> Vec<Violation> {
        let method = repo.iter_methods().find(|m| m.name() == "m").unwrap();
        let cfg = Cfg::from_method(&method).unwrap();
        let vna = compute_value_numbers(ctx, &method, &cfg).unwrap();
        let forward = compute_forward(&vna, tqv).unwrap();
        let backward = compute_backward(&vna, prune.then_some(&forward), tqv).unwrap();
        check_type_qualifier(&vna, &forward, &backward).unwrap()
    }

    #[test]
    fn strict_violation_cites_sources() {
        let tqv = TypeQualifierValue::nonnull().strict();
        let repo = program(Instr::Load(Kind::Int, 1));
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default())
            .with_annotations(annotations(&repo, &tqv, None));

        let found = violations(&repo, &ctx, &tqv, true);
        assert_eq!(found.len(), 1);
        let violation = &found[0];

        assert_eq!(violation.sinks.len(), 1);
        let sink = violation.sinks.iter().next().unwrap();
        assert_eq!(sink.kind, SourceSinkKind::ArgumentToCalledMethod);
        assert_eq!(sink.location, Addr(7));
        assert_eq!(sink.parameter, Some(0));
        assert_eq!(sink.when, When::Always);

        assert!(violation
            .sources_always
            .iter()
            .any(|s| s.kind == SourceSinkKind::FieldLoad && s.location == Addr(0) && s.when == When::Always));
        assert!(violation
            .sources_never
            .iter()
            .any(|s| s.kind == SourceSinkKind::Parameter && s.parameter == Some(0) && s.local == Some(0)));
        assert!(violation
            .conflicts
            .iter()
            .any(|c| c.site == ConflictSite::Location(Addr(7)) && c.forward == FlowValue::Unknown));
    }

    #[test]
    fn check_method_matches_pruned_analyses() {
        let tqv = TypeQualifierValue::nonnull().strict();
        let repo = program(Instr::Load(Kind::Int, 1));
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default())
            .with_annotations(annotations(&repo, &tqv, None));
        let method = repo.iter_methods().find(|m| m.name() == "m").unwrap();
        let cfg = Cfg::from_method(&method).unwrap();
        let vna = compute_value_numbers(&ctx, &method, &cfg).unwrap();

        // The forward analysis only lives inside the call.
        let found = check_method(&vna, &tqv).unwrap();
        let expected = violations(&repo, &ctx, &tqv, true);
        assert_eq!(found.len(), expected.len());
        assert_eq!(found[0].sinks, expected[0].sinks);
        assert_eq!(found[0].sources_always, expected[0].sources_always);
    }

    #[test]
    fn dead_branch_is_not_reported() {
        let tqv = TypeQualifierValue::nonnull().strict();
        let repo = program(Instr::Const(Constant::Int(0)));
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default())
            .with_annotations(annotations(&repo, &tqv, None));
        assert!(violations(&repo, &ctx, &tqv, true).is_empty());
    }

    #[test]
    fn lenient_conflicts_are_pruned() {
        let tqv = TypeQualifierValue::nonnull();
        let repo = program(Instr::Load(Kind::Int, 1));
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default())
            .with_annotations(annotations(&repo, &tqv, Some(When::Never)));

        // The requirement flows back through the phi onto the parameter,
        // known to lack the qualifier.
        let unpruned = violations(&repo, &ctx, &tqv, false);
        assert_eq!(unpruned.len(), 1);
        assert!(unpruned[0]
            .conflicts
            .iter()
            .all(|c| c.forward == FlowValue::Never && c.backward == FlowValue::Always));
        assert!(unpruned[0]
            .conflicts
            .iter()
            .any(|c| c.site == ConflictSite::Location(Addr(4))));

        assert!(violations(&repo, &ctx, &tqv, true).is_empty());

        let options = AnalysisOptions {
            prune_conflicting_values: false,
            ..AnalysisOptions::default()
        };
        let ctx = AnalysisContext::new(&repo, options).with_annotations(annotations(&repo, &tqv, Some(When::Never)));
        assert_eq!(violations(&repo, &ctx, &tqv, true).len(), 1);
    }

    #[test]
    fn identity_functions_copy_qualifiers() {
        // static void box(int i) { T.sink(Integer.valueOf(i)); }
        let tqv = TypeQualifierValue::new("a/Positive", None).strict();
        let static_public = MethodFlags::ACC_PUBLIC | MethodFlags::ACC_STATIC;
        let repo = testing::repo(vec![ClassDef::new("a/T")
            .with_method(testing::method(
                "sink",
                "(Ljava/lang/Integer;)V",
                static_public,
                testing::code(1, vec![Instr::ReturnVoid]),
            ))
            .with_method(testing::method(
                "box",
                "(I)V",
                static_public,
                testing::code(
                    1,
                    vec![
                        Instr::Load(Kind::Int, 0),
                        testing::invoke(InvokeKind::Static, "java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;"),
                        testing::invoke(InvokeKind::Static, "a/T", "sink", "(Ljava/lang/Integer;)V"),
                        Instr::ReturnVoid,
                    ],
                ),
            ))]);
        let method = repo.iter_methods().find(|m| m.name() == "box").unwrap();
        let sink = repo.iter_methods().find(|m| m.name() == "sink").unwrap();
        let mut db = AnnotationDatabase::new();
        db.add(AnnotationTarget::Parameter(method.key().clone(), 0), &tqv, When::Never);
        db.add(AnnotationTarget::Parameter(sink.key().clone(), 0), &tqv, When::Always);
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default()).with_annotations(db);

        let cfg = Cfg::from_method(&method).unwrap();
        let vna = compute_value_numbers(&ctx, &method, &cfg).unwrap();
        let forward = compute_forward(&vna, &tqv).unwrap();
        let boxed = *vna.fact_after(Addr(1)).unwrap().top().unwrap();
        let fact = forward.fact_after(Addr(1)).unwrap();
        assert_eq!(fact.value(boxed), FlowValue::Never);
        assert!(forward.analysis().sources_at(Addr(1)).is_none());

        let found = check_method(&vna, &tqv).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0]
            .sources_never
            .iter()
            .any(|s| s.kind == SourceSinkKind::Parameter));
    }
}
