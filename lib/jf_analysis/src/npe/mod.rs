//! Null value analysis.
//!
//! Tracks, for every local and stack slot, whether the value it holds may
//! be null, and why. Values are classified when they are produced (null
//! constants, allocations, annotated fields, parameters and call results),
//! refined by null comparisons and dereferences, and merged with the
//! matrix of [`IsNullValue::merge`].

mod analysis;
mod decision;
mod frame;
mod value;
mod visitor;

pub use analysis::{compute_null_values, locations_where_value_becomes_null, IsNullValueAnalysis, IsNullValueDataflow};
pub use decision::IsNullConditionDecision;
pub use frame::IsNullValueFrame;
pub use value::{IsNullValue, NullFlags, NullKind, NullOrigin};
pub use visitor::{dereferenced_value, IsNullValueModelingVisitor};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{AnnotationDatabase, AnnotationTarget};
    use crate::config::AnalysisOptions;
    use crate::context::AnalysisContext;
    use crate::controlflow::Cfg;
    use crate::repo::Repo;
    use crate::testing;
    use crate::typequal::{TypeQualifierValue, When};
    use crate::vna::compute_value_numbers;
    use jf_bytecode::classes::{ClassDef, FieldFlags, MethodFlags};
    use jf_bytecode::instrs::{Cond, Constant, Instr, InvokeKind, Kind, StackOp};
    use jf_bytecode::types::Type;
    use jf_bytecode::Addr;

    const OBJECT: &str = "Ljava/lang/Object;";

    fn static_public() -> MethodFlags {
        MethodFlags::ACC_PUBLIC | MethodFlags::ACC_STATIC
    }

    fn method_key(repo: &Repo, name: &str) -> crate::repo::MethodKey {
        repo.iter_methods().find(|m| m.name() == name).unwrap().key().clone()
    }

    // Runs value numbering and the null value analysis on `name`, and
    // hands the results to `check`.
    fn with_null_values<F>(repo: &Repo, ctx: &AnalysisContext, name: &str, check: F)
    where
        F: FnOnce(&IsNullValueDataflow),
    {
        let method = repo.iter_methods().find(|m| m.name() == name).unwrap();
        let cfg = Cfg::from_method(&method).unwrap();
        let vna = compute_value_numbers(ctx, &method, &cfg).unwrap();
        let df = compute_null_values(&vna).unwrap();
        check(&df);
    }

    #[test]
    fn null_checks_refine_branches() {
        // static Object m(Object p) { if (p == null) return null; return p; }
        let repo = testing::repo(vec![ClassDef::new("a/T").with_method(testing::method(
            "m",
            "(Ljava/lang/Object;)Ljava/lang/Object;",
            static_public(),
            testing::code(
                1,
                vec![
                    Instr::Load(Kind::Ref, 0),
                    Instr::IfNonNull(Addr(4)),
                    Instr::Const(Constant::Null),
                    Instr::Return(Kind::Ref),
                    Instr::Load(Kind::Ref, 0),
                    Instr::Return(Kind::Ref),
                ],
            ),
        ))]);
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default());
        with_null_values(&repo, &ctx, "m", |df| {
            let entry = df.fact_at(Addr(0)).unwrap();
            assert_eq!(entry.value(0).unwrap(), &IsNullValue::non_reporting_non_null());

            let null_branch = df.fact_at(Addr(2)).unwrap();
            assert_eq!(null_branch.value(0).unwrap().kind(), NullKind::CheckedNull);
            let non_null_branch = df.fact_at(Addr(4)).unwrap();
            assert_eq!(non_null_branch.value(0).unwrap().kind(), NullKind::CheckedNonNull);

            assert_eq!(df.fact_after(Addr(2)).unwrap().top().unwrap(), &IsNullValue::null());

            let vna = df.analysis().vna();
            let param = vna.analysis().entry_value(0).unwrap();
            let null = *vna.fact_after(Addr(2)).unwrap().top().unwrap();
            let locations = locations_where_value_becomes_null(df).unwrap();
            assert!(locations.contains(&(Addr(1), param)));
            assert!(locations.contains(&(Addr(2), null)));
            assert_eq!(locations.len(), 2);
        });
    }

    #[test]
    fn instance_of_refines_branches() {
        // static Object m(@CheckForNull Object p) { if (p instanceof String) return p; return null; }
        let repo = testing::repo(vec![ClassDef::new("a/T").with_method(testing::method(
            "m",
            "(Ljava/lang/Object;)Ljava/lang/Object;",
            static_public(),
            testing::code(
                1,
                vec![
                    Instr::Load(Kind::Ref, 0),
                    Instr::InstanceOf(Type::class("java/lang/String")),
                    Instr::If(Cond::Eq, Addr(5)),
                    Instr::Load(Kind::Ref, 0),
                    Instr::Return(Kind::Ref),
                    Instr::Const(Constant::Null),
                    Instr::Return(Kind::Ref),
                ],
            ),
        ))]);
        let mut db = AnnotationDatabase::new();
        db.add(
            AnnotationTarget::Parameter(method_key(&repo, "m"), 0),
            &TypeQualifierValue::nonnull(),
            When::Maybe,
        );
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default()).with_annotations(db);
        with_null_values(&repo, &ctx, "m", |df| {
            // `instanceof` ends its block, the test is used in the next one
            let cfg = df.cfg();
            assert_ne!(cfg.block_of(Addr(1)), cfg.block_of(Addr(2)));

            let passed = df.fact_at(Addr(3)).unwrap().value(0).unwrap();
            assert_eq!(passed.kind(), NullKind::CheckedNonNull);
            let failed = df.fact_at(Addr(5)).unwrap().value(0).unwrap();
            assert!(failed.is_null_on_some_path());
        });
    }

    #[test]
    fn annotated_fields() {
        // static Object m() { return T.f; }
        let repo = testing::repo(vec![ClassDef::new("a/T")
            .with_field(testing::field("f", OBJECT, FieldFlags::ACC_STATIC))
            .with_method(testing::method(
                "m",
                "()Ljava/lang/Object;",
                static_public(),
                testing::code(
                    0,
                    vec![
                        Instr::GetStatic(testing::field_ref("a/T", "f", OBJECT)),
                        Instr::Return(Kind::Ref),
                    ],
                ),
            ))]);
        let field = repo.field_info(&testing::field_ref("a/T", "f", OBJECT), true);
        let nonnull = TypeQualifierValue::nonnull();

        for (when, expected) in [
            (When::Maybe, NullKind::NullOnSimplePath),
            (When::Always, NullKind::NonNull),
            (When::Unknown, NullKind::NonReportingNonNull),
        ] {
            let mut db = AnnotationDatabase::new();
            db.add(AnnotationTarget::Field(field.key.clone()), &nonnull, when);
            let ctx = AnalysisContext::new(&repo, AnalysisOptions::default()).with_annotations(db);
            with_null_values(&repo, &ctx, "m", |df| {
                let loaded = df.fact_after(Addr(0)).unwrap().top().unwrap();
                assert_eq!(loaded.kind(), expected);
                if when == When::Maybe {
                    assert!(loaded.is_field_value());
                    assert_eq!(loaded.origin(), Some(&NullOrigin::Field(field.key.clone())));
                }
            });
        }
    }

    #[test]
    fn dereference_proves_non_null() {
        // static int m(Object p) { p.hashCode(); return p == null ? 0 : 1; }
        let repo = testing::repo(vec![ClassDef::new("a/T").with_method(testing::method(
            "m",
            "(Ljava/lang/Object;)I",
            static_public(),
            testing::code(
                1,
                vec![
                    Instr::Load(Kind::Ref, 0),
                    testing::invoke(InvokeKind::Virtual, "java/lang/Object", "hashCode", "()I"),
                    Instr::Stack(StackOp::Pop),
                    Instr::Load(Kind::Ref, 0),
                    Instr::IfNull(Addr(7)),
                    Instr::Const(Constant::Int(1)),
                    Instr::Return(Kind::Int),
                    Instr::Const(Constant::Int(0)),
                    Instr::Return(Kind::Int),
                ],
            ),
        ))]);
        let mut db = AnnotationDatabase::new();
        db.add(
            AnnotationTarget::Parameter(method_key(&repo, "m"), 0),
            &TypeQualifierValue::nonnull(),
            When::Maybe,
        );
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default()).with_annotations(db);
        with_null_values(&repo, &ctx, "m", |df| {
            let param = df.fact_at(Addr(0)).unwrap().value(0).unwrap();
            assert!(param.is_null_on_some_path() && param.is_parameter());

            let after = df.fact_after(Addr(1)).unwrap();
            assert_eq!(after.value(0).unwrap(), &IsNullValue::no_kaboom_non_null(Addr(1)));

            // The null branch of the later check cannot be taken.
            assert!(df.fact_at(Addr(7)).unwrap().is_top());
            assert!(df.fact_at(Addr(5)).unwrap().is_valid());
        });
    }

    #[test]
    fn redundant_loads_reuse_known_values() {
        // Object m() { if (this.f == null) return null; return this.f; }
        let f = testing::field_ref("a/T", "f", OBJECT);
        let repo = testing::repo(vec![ClassDef::new("a/T")
            .with_field(testing::field("f", OBJECT, FieldFlags::ACC_PRIVATE))
            .with_method(testing::method(
                "m",
                "()Ljava/lang/Object;",
                MethodFlags::ACC_PUBLIC,
                testing::code(
                    1,
                    vec![
                        Instr::Load(Kind::Ref, 0),
                        Instr::GetField(f.clone()),
                        Instr::IfNull(Addr(6)),
                        Instr::Load(Kind::Ref, 0),
                        Instr::GetField(f),
                        Instr::Return(Kind::Ref),
                        Instr::Const(Constant::Null),
                        Instr::Return(Kind::Ref),
                    ],
                ),
            ))]);

        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default());
        with_null_values(&repo, &ctx, "m", |df| {
            assert_eq!(df.fact_at(Addr(0)).unwrap().value(0).unwrap(), &IsNullValue::non_null());
            let reloaded = df.fact_after(Addr(4)).unwrap().top().unwrap();
            assert_eq!(reloaded, &IsNullValue::checked_non_null());
        });

        let options = AnalysisOptions {
            redundant_load_elimination: false,
            ..AnalysisOptions::default()
        };
        let ctx = AnalysisContext::new(&repo, options);
        with_null_values(&repo, &ctx, "m", |df| {
            let reloaded = df.fact_after(Addr(4)).unwrap().top().unwrap();
            assert_eq!(reloaded, &IsNullValue::non_reporting_non_null());
        });
    }

    #[test]
    fn assertions_erase_null_information() {
        // static void m(@CheckForNull Object p) { T.assertNotNull(p); }
        let repo = testing::repo(vec![ClassDef::new("a/T").with_method(testing::method(
            "m",
            "(Ljava/lang/Object;)V",
            static_public(),
            testing::code(
                1,
                vec![
                    Instr::Load(Kind::Ref, 0),
                    testing::invoke(InvokeKind::Static, "a/T", "assertNotNull", "(Ljava/lang/Object;)V"),
                    Instr::ReturnVoid,
                ],
            ),
        ))]);
        let annotations = || {
            let mut db = AnnotationDatabase::new();
            db.add(
                AnnotationTarget::Parameter(method_key(&repo, "m"), 0),
                &TypeQualifierValue::nonnull(),
                When::Maybe,
            );
            db
        };

        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default()).with_annotations(annotations());
        with_null_values(&repo, &ctx, "m", |df| {
            assert!(df.fact_after(Addr(1)).unwrap().value(0).unwrap().is_null_on_some_path());
        });

        let options = AnalysisOptions {
            erase_null_info_after_assertions: true,
            ..AnalysisOptions::default()
        };
        let ctx = AnalysisContext::new(&repo, options).with_annotations(annotations());
        with_null_values(&repo, &ctx, "m", |df| {
            assert_eq!(
                df.fact_after(Addr(1)).unwrap().value(0).unwrap(),
                &IsNullValue::non_reporting_non_null()
            );
        });
    }

    #[test]
    fn parameter_annotations() {
        // void m(@CheckForNull Object a, long b, @Nonnull Object c)
        let repo = testing::repo(vec![ClassDef::new("a/T").with_method(testing::method(
            "m",
            "(Ljava/lang/Object;JLjava/lang/Object;)V",
            MethodFlags::ACC_PUBLIC,
            testing::code(5, vec![Instr::ReturnVoid]),
        ))]);
        let key = method_key(&repo, "m");
        let nonnull = TypeQualifierValue::nonnull();
        let mut db = AnnotationDatabase::new();
        db.add(AnnotationTarget::Parameter(key.clone(), 0), &nonnull, When::Maybe);
        db.add(AnnotationTarget::Parameter(key, 2), &nonnull, When::Always);
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default()).with_annotations(db);
        with_null_values(&repo, &ctx, "m", |df| {
            let entry = df.fact_at(Addr(0)).unwrap();
            assert_eq!(entry.value(0).unwrap(), &IsNullValue::non_null());
            assert_eq!(entry.value(1).unwrap(), &IsNullValue::parameter_might_be_null(0));
            assert_eq!(entry.value(2).unwrap(), &IsNullValue::non_reporting_non_null());
            assert_eq!(entry.value(4).unwrap(), &IsNullValue::parameter_non_null(2));
        });
    }

    #[test]
    fn call_results_merge_all_targets() {
        // static Object m(Base b) { return b.get(); }
        let get = || {
            testing::method(
                "get",
                "()Ljava/lang/Object;",
                MethodFlags::ACC_PUBLIC,
                testing::code(1, vec![Instr::Const(Constant::Null), Instr::Return(Kind::Ref)]),
            )
        };
        let repo = testing::repo(vec![
            ClassDef::new("a/Base").with_method(get()),
            ClassDef::new("a/Sub").extends("a/Base").with_method(get()),
            ClassDef::new("a/T").with_method(testing::method(
                "m",
                "(La/Base;)Ljava/lang/Object;",
                static_public(),
                testing::code(
                    1,
                    vec![
                        Instr::Load(Kind::Ref, 0),
                        testing::invoke(InvokeKind::Virtual, "a/Base", "get", "()Ljava/lang/Object;"),
                        Instr::Return(Kind::Ref),
                    ],
                ),
            )),
        ]);
        let target = |class: &str| {
            repo.iter_methods()
                .find(|m| m.name() == "get" && m.class_name() == class)
                .unwrap()
                .key()
                .clone()
        };
        let nonnull = TypeQualifierValue::nonnull();

        let mut db = AnnotationDatabase::new();
        db.add(AnnotationTarget::Return(target("a/Base")), &nonnull, When::Maybe);
        db.add(AnnotationTarget::Return(target("a/Sub")), &nonnull, When::Always);
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default()).with_annotations(db);
        with_null_values(&repo, &ctx, "m", |df| {
            let result = df.fact_after(Addr(1)).unwrap().top().unwrap();
            assert!(result.is_null_on_some_path());
            assert!(result.is_return_value());
            assert_eq!(result.origin(), Some(&NullOrigin::ReturnValue(target("a/Base"))));
        });

        let mut db = AnnotationDatabase::new();
        db.add(AnnotationTarget::Return(target("a/Base")), &nonnull, When::Always);
        db.add(AnnotationTarget::Return(target("a/Sub")), &nonnull, When::Always);
        let ctx = AnalysisContext::new(&repo, AnalysisOptions::default()).with_annotations(db);
        with_null_values(&repo, &ctx, "m", |df| {
            let result = df.fact_after(Addr(1)).unwrap().top().unwrap();
            assert!(result.is_definitely_not_null());
            assert_eq!(result.origin(), None);
        });
    }
}
