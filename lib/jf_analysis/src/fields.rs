//! Field access summaries.

use crate::repo::{FieldInfo, FieldKey, Method, MethodKey, Repo};
use jf_bytecode::code::Code;
use jf_bytecode::instrs::Instr;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Fields written by the methods of the repository.
///
/// Computed once before a batch run and then shared read-only.
#[derive(Debug, Default, Clone)]
pub struct FieldSummary {
    written_outside_of_constructor: BTreeSet<FieldKey>,
    fields_written: BTreeMap<MethodKey, BTreeSet<FieldKey>>,
}

impl FieldSummary {
    #[must_use]
    pub fn compute(repo: &Repo) -> Self {
        let methods: Vec<Method> = repo.iter_methods().filter(|m| m.code().is_some()).collect();
        let writes: Vec<(MethodKey, Vec<(FieldInfo, bool)>)> = methods
            .par_iter()
            .map(|method| {
                let written = method
                    .code()
                    .map(|code| {
                        stored_fields(repo, code)
                            .map(|field| {
                                let in_initializer = is_initializer_of(method, &field);
                                (field, in_initializer)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                (method.key().clone(), written)
            })
            .collect();

        let mut summary = Self::default();
        for (method, written) in writes {
            for (field, in_initializer) in written {
                if !in_initializer {
                    summary.written_outside_of_constructor.insert(field.key.clone());
                }
                summary
                    .fields_written
                    .entry(method.clone())
                    .or_default()
                    .insert(field.key);
            }
        }
        log::debug!(
            "field summary: {} fields written outside of constructors",
            summary.written_outside_of_constructor.len()
        );
        summary
    }

    /// Can the field be written once its object (or class) is initialized?
    ///
    /// Fields whose defining class is unknown may be written anywhere.
    #[must_use]
    pub fn is_written_outside_of_constructor(&self, field: &FieldInfo) -> bool {
        !field.resolved || self.written_outside_of_constructor.contains(&field.key)
    }

    /// Fields directly written by a method.
    #[must_use]
    pub fn fields_written(&self, method: &MethodKey) -> Option<&BTreeSet<FieldKey>> {
        self.fields_written.get(method)
    }
}

// Instance fields written by a constructor of their class, and static
// fields written by the static initializer of their class.
fn is_initializer_of(method: &Method, field: &FieldInfo) -> bool {
    let initializer = if field.is_static { "<clinit>" } else { "<init>" };
    method.name() == initializer && method.class_name() == field.class_name()
}

fn stored_fields<'a>(repo: &'a Repo, code: &'a Code) -> impl Iterator<Item = FieldInfo> + 'a {
    code.iter_instructions()
        .filter_map(move |linstr| match linstr.instr() {
            Instr::PutField(field) => Some(repo.field_info(field, false)),
            Instr::PutStatic(field) => Some(repo.field_info(field, true)),
            _ => None,
        })
}

/// Fields loaded and stored by one method.
///
/// Stores are only forwarded to later loads of fields the method loads.
#[derive(Debug, Default, Clone)]
pub struct LoadedFieldSet {
    loaded: BTreeSet<FieldKey>,
    stored: BTreeSet<FieldKey>,
}

impl LoadedFieldSet {
    #[must_use]
    pub fn compute(repo: &Repo, code: &Code) -> Self {
        let mut set = Self::default();
        for linstr in code.iter_instructions() {
            match linstr.instr() {
                Instr::GetField(field) => {
                    set.loaded.insert(repo.field_info(field, false).key);
                }
                Instr::GetStatic(field) => {
                    set.loaded.insert(repo.field_info(field, true).key);
                }
                _ => (),
            }
        }
        set.stored = stored_fields(repo, code).map(|f| f.key).collect();
        set
    }

    #[must_use]
    pub fn is_loaded(&self, field: &FieldKey) -> bool {
        self.loaded.contains(field)
    }

    #[must_use]
    pub fn is_stored(&self, field: &FieldKey) -> bool {
        self.stored.contains(field)
    }

    pub fn iter_loaded(&self) -> impl Iterator<Item = &FieldKey> {
        self.loaded.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use jf_bytecode::classes::{ClassDef, FieldFlags, MethodFlags};
    use jf_bytecode::instrs::Kind;

    fn repo() -> Repo {
        let f = testing::field_ref("a/A", "f", "I");
        let g = testing::field_ref("a/A", "g", "I");
        testing::repo(vec![
            ClassDef::new("a/A")
                .with_field(testing::field("f", "I", FieldFlags::ACC_PRIVATE))
                .with_field(testing::field("g", "I", FieldFlags::ACC_PRIVATE))
                .with_method(testing::method(
                    "<init>",
                    "()V",
                    MethodFlags::ACC_PUBLIC,
                    testing::code(
                        1,
                        vec![
                            Instr::Load(Kind::Ref, 0),
                            Instr::Const(jf_bytecode::instrs::Constant::Int(1)),
                            Instr::PutField(f.clone()),
                            Instr::ReturnVoid,
                        ],
                    ),
                ))
                .with_method(testing::method(
                    "setG",
                    "(I)V",
                    MethodFlags::ACC_PUBLIC,
                    testing::code(
                        2,
                        vec![
                            Instr::Load(Kind::Ref, 0),
                            Instr::Load(Kind::Int, 1),
                            Instr::PutField(g),
                            Instr::ReturnVoid,
                        ],
                    ),
                ))
                .with_method(testing::method(
                    "getF",
                    "()I",
                    MethodFlags::ACC_PUBLIC,
                    testing::code(
                        1,
                        vec![
                            Instr::Load(Kind::Ref, 0),
                            Instr::GetField(f),
                            Instr::Return(Kind::Int),
                        ],
                    ),
                )),
        ])
    }

    #[test]
    fn written_outside_of_constructor() {
        let repo = repo();
        let summary = FieldSummary::compute(&repo);
        let f = repo.field_info(&testing::field_ref("a/A", "f", "I"), false);
        let g = repo.field_info(&testing::field_ref("a/A", "g", "I"), false);
        let unknown = repo.field_info(&testing::field_ref("b/B", "h", "I"), false);
        assert!(!summary.is_written_outside_of_constructor(&f));
        assert!(summary.is_written_outside_of_constructor(&g));
        assert!(summary.is_written_outside_of_constructor(&unknown));

        let set_g = repo
            .iter_methods()
            .find(|m| m.name() == "setG")
            .unwrap();
        let written = summary.fields_written(set_g.key()).unwrap();
        assert!(written.contains(&g.key));
        assert_eq!(written.len(), 1);
    }

    #[test]
    fn loaded_fields() {
        let repo = repo();
        let get_f = repo.iter_methods().find(|m| m.name() == "getF").unwrap();
        let set = LoadedFieldSet::compute(&repo, get_f.code().unwrap());
        let f = repo.field_info(&testing::field_ref("a/A", "f", "I"), false);
        assert!(set.is_loaded(&f.key));
        assert!(!set.is_stored(&f.key));
        assert_eq!(set.iter_loaded().count(), 1);
    }
}
