use crate::errors::{AnalysisError, AnalysisResult};
use crate::hierarchy::Hierarchy;
use crate::repo::{FieldInfo, Method, MethodKey};
use jf_bytecode::classes::ClassDef;
use jf_bytecode::instrs::InvokeKind;
use jf_bytecode::refs::{FieldRef, MethodRef};
use jf_bytecode::types::MethodDescriptor;
use regex::Regex;
use std::collections::BTreeMap;

/// The set of classes under analysis, with their hierarchy.
///
/// The repository is immutable once the hierarchy is closed and is
/// shared read-only between worker threads.
#[derive(Debug)]
pub struct Repo {
    hierarchy: Hierarchy,
}

impl Default for Repo {
    fn default() -> Self {
        Self::new()
    }
}

impl Repo {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hierarchy: Hierarchy::new(),
        }
    }

    /// Builds a closed repository from a set of classes.
    pub fn from_classes<I>(classes: I) -> AnalysisResult<Self>
    where
        I: IntoIterator<Item = ClassDef>,
    {
        let mut repo = Self::new();
        for class in classes {
            repo.register_class(class)?;
        }
        repo.close_hierarchy()?;
        Ok(repo)
    }

    pub fn register_class(&mut self, class: ClassDef) -> AnalysisResult<()> {
        log::debug!("registering class {}", class.name);
        self.hierarchy.insert_class(class)
    }

    pub fn close_hierarchy(&mut self) -> AnalysisResult<()> {
        self.hierarchy.close()
    }

    #[inline]
    #[must_use]
    pub const fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn iter_classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.hierarchy.iter_classes()
    }

    #[must_use]
    pub fn get_class_by_name(&self, name: &str) -> Option<&ClassDef> {
        self.hierarchy.get_class(name)
    }

    pub fn iter_methods(&self) -> impl Iterator<Item = Method<'_>> {
        self.iter_classes()
            .flat_map(|class| class.methods.iter().map(move |m| Method::new(class, m)))
    }

    /// Methods whose key (`class.name(descriptor)`) matches the pattern.
    pub fn find_methods<'a>(&'a self, pattern: &'a Regex) -> impl Iterator<Item = Method<'a>> {
        self.iter_methods()
            .filter(move |m| pattern.is_match(&m.key().to_string()))
    }

    #[must_use]
    pub fn get_method(&self, key: &MethodKey) -> Option<Method<'_>> {
        let class = self.get_class_by_name(&key.class)?;
        class
            .find_method(&key.name, &key.descriptor)
            .map(|m| Method::new(class, m))
    }

    /// Looks up a method in a class and then in its supertypes.
    pub fn resolve_method(
        &self,
        class: &str,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> AnalysisResult<Method<'_>> {
        for c in self.hierarchy.all_parents(class)? {
            if let Some(m) = c.find_method(name, descriptor) {
                return Ok(Method::new(c, m));
            }
        }
        Err(AnalysisError::MethodNotFound(format!(
            "{class}.{name}{descriptor}"
        )))
    }

    /// Looks up the class defining a referenced field.
    pub fn resolve_field(&self, field: &FieldRef, is_static: bool) -> AnalysisResult<FieldInfo> {
        for c in self.hierarchy.all_parents(&field.class)? {
            if let Some(def) = c.find_field(&field.name, &field.typ) {
                return Ok(FieldInfo {
                    key: crate::repo::FieldKey::new(&c.name, &def.name, def.typ.clone()),
                    is_static: def.is_static(),
                    is_final: def.is_final(),
                    is_volatile: def.is_volatile(),
                    resolved: true,
                });
            }
        }
        log::debug!("field {field} not found, static: {is_static}");
        Err(AnalysisError::ClassNotFound(field.class.clone()))
    }

    /// Resolves a field, answering with conservative flags when the
    /// defining class is missing.
    #[must_use]
    pub fn field_info(&self, field: &FieldRef, is_static: bool) -> FieldInfo {
        self.resolve_field(field, is_static)
            .unwrap_or_else(|_| FieldInfo::unresolved(field, is_static))
    }

    /// All the method implementations an invoke instruction may reach.
    ///
    /// Virtual and interface calls reach the resolved method (if concrete)
    /// and every overriding implementation in subtypes of the referenced
    /// class.
    pub fn resolve_call_targets(
        &self,
        method: &MethodRef,
        kind: InvokeKind,
    ) -> AnalysisResult<Vec<Method<'_>>> {
        let resolved = self.resolve_method(&method.class, &method.name, &method.descriptor)?;
        match kind {
            InvokeKind::Static | InvokeKind::Special => Ok(vec![resolved]),
            InvokeKind::Virtual | InvokeKind::Interface => {
                let mut targets = BTreeMap::new();
                if !resolved.is_abstract() {
                    targets.insert(resolved.key().clone(), resolved);
                }
                for c in self.hierarchy.all_children(&method.class)? {
                    if let Some(m) = c.find_method(&method.name, &method.descriptor) {
                        let m = Method::new(c, m);
                        if !m.is_abstract() && !m.is_static() {
                            targets.insert(m.key().clone(), m);
                        }
                    }
                }
                Ok(targets.into_values().collect())
            }
        }
    }

    /// Methods overridden or implemented by the given method, nearest
    /// supertype first.
    pub fn overridden_methods(&self, method: &Method) -> AnalysisResult<Vec<Method<'_>>> {
        if method.is_static() || method.is_constructor() {
            return Ok(Vec::new());
        }
        Ok(self
            .hierarchy
            .all_parents(method.class_name())?
            .into_iter()
            .skip(1)
            .filter_map(|c| {
                c.find_method(method.name(), method.descriptor())
                    .map(|m| Method::new(c, m))
            })
            .collect())
    }

    #[must_use]
    pub fn nb_classes(&self) -> usize {
        self.iter_classes().count()
    }

    #[must_use]
    pub fn nb_methods(&self) -> usize {
        self.iter_classes().map(|c| c.methods.len()).sum()
    }
}
