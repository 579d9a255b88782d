//! Classes hierarchy graph representation.

use crate::errors::{AnalysisError, AnalysisResult};
use jf_bytecode::classes::ClassDef;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef, Reversed};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

pub(crate) const JAVA_LANG_OBJECT: &str = "java/lang/Object";

#[derive(Debug, PartialEq, Eq)]
pub enum Inheritance {
    Extends,
    Implements,
}

impl fmt::Display for Inheritance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Extends => write!(f, "<extends>"),
            Self::Implements => write!(f, "<implements>"),
        }
    }
}

/// Subtyping graph: edges go from a class to its direct supertypes.
#[derive(Debug)]
pub struct Hierarchy {
    inner: DiGraph<ClassDef, Inheritance>,
    node_ids: BTreeMap<String, NodeIndex>,
    missing: BTreeSet<String>,
}

impl Hierarchy {
    pub(crate) fn new() -> Self {
        Self {
            inner: DiGraph::new(),
            node_ids: BTreeMap::new(),
            missing: BTreeSet::new(),
        }
    }

    pub(crate) fn insert_class(&mut self, class: ClassDef) -> AnalysisResult<()> {
        if self.node_ids.contains_key(&class.name) {
            return Err(AnalysisError::Internal(format!(
                "duplicate class {} in hierarchy graph",
                class.name
            )));
        }

        let class_name = class.name.clone();
        let id = self.inner.add_node(class);
        self.node_ids.insert(class_name, id);
        Ok(())
    }

    pub(crate) fn contains_class(&self, class_name: &str) -> bool {
        self.node_ids.contains_key(class_name)
    }

    pub fn iter_classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.inner.node_weights()
    }

    /// Names of the supertypes referenced by registered classes but not
    /// registered themselves.
    pub fn iter_missing_classes(&self) -> impl Iterator<Item = &str> {
        self.missing.iter().map(String::as_str)
    }

    fn insert_link(&mut self, from: &str, to: &str, link: Inheritance) -> AnalysisResult<()> {
        let src = self
            .node_ids
            .get(from)
            .ok_or_else(|| AnalysisError::ClassNotFound(from.to_string()))?;
        let dst = self
            .node_ids
            .get(to)
            .ok_or_else(|| AnalysisError::ClassNotFound(to.to_string()))?;
        self.inner.add_edge(*src, *dst, link);
        Ok(())
    }

    /// Links every registered class to its declared supertypes. A
    /// `java/lang/Object` stub is added when not registered.
    pub(crate) fn close(&mut self) -> AnalysisResult<()> {
        if !self.contains_class(JAVA_LANG_OBJECT) {
            let mut object = ClassDef::new(JAVA_LANG_OBJECT);
            object.super_class = None;
            self.insert_class(object)?;
        }
        self.inner.clear_edges();
        self.missing.clear();

        let links: Vec<(String, String, Inheritance)> = self
            .inner
            .node_weights()
            .flat_map(|class| {
                class
                    .super_class
                    .iter()
                    .map(|s| (class.name.clone(), s.clone(), Inheritance::Extends))
                    .chain(
                        class
                            .interfaces
                            .iter()
                            .map(|i| (class.name.clone(), i.clone(), Inheritance::Implements)),
                    )
                    .collect::<Vec<_>>()
            })
            .collect();

        for (from, to, link) in links {
            if self.contains_class(&to) {
                self.insert_link(&from, &to, link)?;
            } else {
                log::warn!("supertype {to} of {from} is missing from the hierarchy");
                self.missing.insert(to);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get_class(&self, class_name: &str) -> Option<&ClassDef> {
        self.node_ids.get(class_name).map(|id| &self.inner[*id])
    }

    fn node(&self, class_name: &str) -> AnalysisResult<NodeIndex> {
        self.node_ids
            .get(class_name)
            .copied()
            .ok_or_else(|| AnalysisError::ClassNotFound(class_name.to_string()))
    }

    fn direct_supertype_ids(&self, id: NodeIndex) -> Vec<NodeIndex> {
        let mut supers: Vec<(&Inheritance, &str, NodeIndex)> = self
            .inner
            .edges_directed(id, Direction::Outgoing)
            .map(|e| (e.weight(), self.inner[e.target()].name.as_str(), e.target()))
            .collect();
        supers.sort_by_key(|(link, name, _)| (**link != Inheritance::Extends, *name));
        supers.into_iter().map(|(_, _, id)| id).collect()
    }

    /// Direct supertypes of a class, superclass first.
    pub fn direct_supertypes(&self, class_name: &str) -> AnalysisResult<Vec<&ClassDef>> {
        let id = self.node(class_name)?;
        Ok(self
            .direct_supertype_ids(id)
            .into_iter()
            .map(|id| &self.inner[id])
            .collect())
    }

    /// The class itself followed by all its supertypes, nearest first
    /// and superclasses before interfaces at equal distance.
    pub fn all_parents(&self, class_name: &str) -> AnalysisResult<Vec<&ClassDef>> {
        let id = self.node(class_name)?;
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        let mut parents = Vec::new();
        seen.insert(id);
        queue.push_back(id);
        while let Some(id) = queue.pop_front() {
            parents.push(&self.inner[id]);
            for sup in self.direct_supertype_ids(id) {
                if seen.insert(sup) {
                    queue.push_back(sup);
                }
            }
        }
        Ok(parents)
    }

    /// The class itself followed by all its subtypes.
    pub fn all_children(&self, class_name: &str) -> AnalysisResult<Vec<&ClassDef>> {
        let id = self.node(class_name)?;
        let reversed = Reversed(&self.inner);
        let mut children = Vec::new();
        let mut bfs = Bfs::new(reversed, id);
        while let Some(id) = bfs.next(reversed) {
            children.push(&self.inner[id]);
        }
        Ok(children)
    }

    pub fn is_subtype(&self, sub: &str, sup: &str) -> AnalysisResult<bool> {
        Ok(self.all_parents(sub)?.iter().any(|c| c.name == sup))
    }

    #[must_use]
    pub fn to_dot(&self) -> String {
        format!(
            "{}",
            Dot::with_attr_getters(
                &self.inner,
                &[Config::EdgeNoLabel],
                &|_, edge| {
                    let style = match edge.weight() {
                        Inheritance::Extends => "solid",
                        Inheritance::Implements => "dashed",
                    };
                    format!("arrowType=empty,style={style}")
                },
                &|_, (_, class)| {
                    if class.is_interface() {
                        String::from("shape=box,style=rounded")
                    } else {
                        String::from("shape=box")
                    }
                }
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> Hierarchy {
        let mut h = Hierarchy::new();
        h.insert_class(ClassDef::new("a/I").with_flags(jf_bytecode::classes::ClassFlags::ACC_INTERFACE))
            .unwrap();
        h.insert_class(ClassDef::new("a/A").implements("a/I")).unwrap();
        h.insert_class(ClassDef::new("a/B").extends("a/A")).unwrap();
        h.insert_class(ClassDef::new("a/C").extends("a/Missing")).unwrap();
        h.close().unwrap();
        h
    }

    #[test]
    fn hierarchy_queries() {
        let h = hierarchy();
        assert!(h.contains_class(JAVA_LANG_OBJECT));
        assert!(h.is_subtype("a/B", "a/I").unwrap());
        assert!(!h.is_subtype("a/A", "a/B").unwrap());
        assert!(h.is_subtype("a/C", "a/C").unwrap());
        assert!(h.is_subtype("a/X", "a/C").is_err());

        let parents: Vec<&str> = h
            .all_parents("a/B")
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(parents[0], "a/B");
        assert_eq!(parents[1], "a/A");

        let children: Vec<&str> = h
            .all_children("a/I")
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(children, vec!["a/I", "a/A", "a/B"]);

        let supers: Vec<&str> = h
            .direct_supertypes("a/A")
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(supers, vec![JAVA_LANG_OBJECT, "a/I"]);
        assert_eq!(h.iter_missing_classes().collect::<Vec<_>>(), vec!["a/Missing"]);
    }

    #[test]
    fn duplicate_class() {
        let mut h = Hierarchy::new();
        h.insert_class(ClassDef::new("a/A")).unwrap();
        assert!(h.insert_class(ClassDef::new("a/A")).is_err());
    }
}
