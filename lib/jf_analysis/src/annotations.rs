//! Declared type qualifier annotations.

use crate::repo::{FieldInfo, FieldKey, Method, MethodKey, Repo};
use crate::typequal::{TypeQualifierValue, When};
use jf_bytecode::refs::MethodRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Program element carrying a qualifier annotation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnnotationTarget {
    /// Value returned by a method.
    Return(MethodKey),
    /// Parameter of a method, by index in the descriptor.
    Parameter(MethodKey, usize),
    Field(FieldKey),
    /// Default applying to every member of a class.
    Class(String),
}

/// Qualifier annotations, looked up by target and qualifier.
///
/// The database is filled before a batch run and only read while methods
/// are analyzed, possibly from several threads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationDatabase {
    entries: BTreeMap<AnnotationTarget, BTreeMap<String, When>>,
}

impl AnnotationDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, target: AnnotationTarget, tqv: &TypeQualifierValue, when: When) {
        self.entries
            .entry(target)
            .or_default()
            .insert(tqv.key(), when);
    }

    /// Annotation written on the target itself.
    #[must_use]
    pub fn direct(&self, target: &AnnotationTarget, tqv: &TypeQualifierValue) -> Option<When> {
        self.entries.get(target)?.get(&tqv.key()).copied()
    }

    /// Effective annotation of a method return value: the method own
    /// annotation, then the annotation of the nearest overridden method,
    /// then the default of the method class.
    #[must_use]
    pub fn return_value(&self, repo: &Repo, method: &Method, tqv: &TypeQualifierValue) -> Option<When> {
        self.lookup_method(repo, method, tqv, AnnotationTarget::Return)
    }

    /// Effective annotation of a method parameter, with the same inheritance
    /// rules as return values.
    #[must_use]
    pub fn parameter(
        &self,
        repo: &Repo,
        method: &Method,
        param: usize,
        tqv: &TypeQualifierValue,
    ) -> Option<When> {
        self.lookup_method(repo, method, tqv, |key| AnnotationTarget::Parameter(key, param))
    }

    /// Effective annotation of a field: its own, or its class default.
    #[must_use]
    pub fn field(&self, field: &FieldInfo, tqv: &TypeQualifierValue) -> Option<When> {
        self.direct(&AnnotationTarget::Field(field.key.clone()), tqv)
            .or_else(|| self.direct(&AnnotationTarget::Class(field.class_name().to_string()), tqv))
    }

    /// Return value annotation of a called method. Unresolved methods only
    /// have their direct annotation.
    #[must_use]
    pub fn called_return_value(&self, repo: &Repo, called: &MethodRef, tqv: &TypeQualifierValue) -> Option<When> {
        match repo.resolve_method(&called.class, &called.name, &called.descriptor) {
            Ok(method) => self.return_value(repo, &method, tqv),
            Err(_) => self.direct(&AnnotationTarget::Return(MethodKey::from(called)), tqv),
        }
    }

    /// Parameter annotation of a called method.
    #[must_use]
    pub fn called_parameter(
        &self,
        repo: &Repo,
        called: &MethodRef,
        param: usize,
        tqv: &TypeQualifierValue,
    ) -> Option<When> {
        match repo.resolve_method(&called.class, &called.name, &called.descriptor) {
            Ok(method) => self.parameter(repo, &method, param, tqv),
            Err(_) => self.direct(&AnnotationTarget::Parameter(MethodKey::from(called), param), tqv),
        }
    }

    fn lookup_method<F>(&self, repo: &Repo, method: &Method, tqv: &TypeQualifierValue, target: F) -> Option<When>
    where
        F: Fn(MethodKey) -> AnnotationTarget,
    {
        if let Some(when) = self.direct(&target(method.key().clone()), tqv) {
            return Some(when);
        }
        let overridden = repo.overridden_methods(method).unwrap_or_else(|err| {
            log::debug!("cannot look up methods overridden by {method}: {err}");
            Vec::new()
        });
        overridden
            .iter()
            .find_map(|m| self.direct(&target(m.key().clone()), tqv))
            .or_else(|| self.direct(&AnnotationTarget::Class(method.class_name().to_string()), tqv))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use jf_bytecode::classes::{ClassDef, FieldFlags};

    #[test]
    fn inherited_annotations() {
        let repo = testing::repo(vec![
            ClassDef::new("a/I")
                .with_flags(jf_bytecode::classes::ClassFlags::ACC_INTERFACE)
                .with_method(testing::abstract_method("get", "(Ljava/lang/Object;)Ljava/lang/Object;")),
            ClassDef::new("a/Impl")
                .implements("a/I")
                .with_field(testing::field("f", "Ljava/lang/Object;", FieldFlags::empty()))
                .with_method(testing::abstract_method("get", "(Ljava/lang/Object;)Ljava/lang/Object;")),
        ]);
        let nonnull = TypeQualifierValue::nonnull();
        let iface = repo
            .iter_methods()
            .find(|m| m.class_name() == "a/I")
            .unwrap();
        let implem = repo
            .iter_methods()
            .find(|m| m.class_name() == "a/Impl")
            .unwrap();

        let mut db = AnnotationDatabase::new();
        db.add(AnnotationTarget::Return(iface.key().clone()), &nonnull, When::Always);
        db.add(AnnotationTarget::Parameter(iface.key().clone(), 0), &nonnull, When::Always);
        db.add(AnnotationTarget::Parameter(implem.key().clone(), 0), &nonnull, When::Maybe);
        db.add(AnnotationTarget::Class("a/Impl".to_string()), &nonnull, When::Unknown);

        assert_eq!(db.return_value(&repo, &implem, &nonnull), Some(When::Always));
        assert_eq!(db.parameter(&repo, &implem, 0, &nonnull), Some(When::Maybe));
        assert_eq!(db.parameter(&repo, &iface, 0, &nonnull), Some(When::Always));

        let field = repo.field_info(&testing::field_ref("a/Impl", "f", "Ljava/lang/Object;"), false);
        assert_eq!(db.field(&field, &nonnull), Some(When::Unknown));

        let missing = jf_bytecode::refs::MethodRef::new("b/B", "m", "()Ljava/lang/Object;").unwrap();
        db.add(AnnotationTarget::Return(MethodKey::from(&missing)), &nonnull, When::Never);
        assert_eq!(db.called_return_value(&repo, &missing, &nonnull), Some(When::Never));
    }
}
