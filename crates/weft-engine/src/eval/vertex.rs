//! Vertices and the work graph
//!
//! The work graph is a plain adjacency map over [`Key`]s: an edge `a → b`
//! means "a must evaluate after b". Two copies exist: `graph` keeps every
//! vertex ever known (for diagnostics), `unevaluated` drops vertices as
//! they evaluate and is what scheduling reads.

use indexmap::{IndexMap, IndexSet};

use weft_construct::{PropertyRef, ResourceId, SimpleEdge};
use weft_kb::{EdgePathSatisfaction, OperationalRule, Property};

use crate::eval::key::Key;

/// A pending property evaluation, with the rule buckets other vertices have
/// merged into it.
#[derive(Debug, Clone)]
pub struct PropertyVertex {
    pub ref_: PropertyRef,
    pub template: Option<Property>,
    /// Rules contributed by edges pointing at this property, bucketed per
    /// edge.
    pub edge_rules: IndexMap<SimpleEdge, Vec<OperationalRule>>,
    /// Rules contributed by resource-level rules, bucketed by rule hash.
    pub resource_rules: IndexMap<String, Vec<OperationalRule>>,
}

#[derive(Debug, Clone)]
pub struct EdgeVertex {
    pub edge: SimpleEdge,
    pub rules: Vec<OperationalRule>,
    /// `(rule, config)` index pairs that were handed off to property
    /// vertices; evaluate must not apply them again.
    pub distributed: IndexSet<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct ResourceRuleVertex {
    pub resource: ResourceId,
    pub rule: OperationalRule,
    pub rule_hash: String,
}

#[derive(Debug, Clone)]
pub struct PathExpandVertex {
    pub edge: SimpleEdge,
    pub satisfaction: EdgePathSatisfaction,
}

#[derive(Debug, Clone)]
pub enum Vertex {
    Property(PropertyVertex),
    Edge(EdgeVertex),
    ResourceRule(ResourceRuleVertex),
    PathExpand(PathExpandVertex),
}

impl Vertex {
    pub fn key(&self) -> Key {
        match self {
            Vertex::Property(v) => Key::Property(v.ref_.clone()),
            Vertex::Edge(v) => Key::Edge(v.edge.clone()),
            Vertex::ResourceRule(v) => Key::ResourceRule {
                resource: v.resource.clone(),
                rule_hash: v.rule_hash.clone(),
            },
            Vertex::PathExpand(v) => Key::PathExpand {
                edge: v.edge.clone(),
                classification: v.satisfaction.classification.clone(),
            },
        }
    }

    /// Merge another vertex with the same key into this one. Property
    /// vertices collect templates and rule buckets; other kinds keep their
    /// existing state.
    pub fn update_from(&mut self, other: Vertex) {
        match (self, other) {
            (Vertex::Property(existing), Vertex::Property(new)) => {
                if existing.template.is_none() {
                    existing.template = new.template;
                }
                for (edge, rules) in new.edge_rules {
                    // already have rules for this edge, don't duplicate them
                    existing.edge_rules.entry(edge).or_insert(rules);
                }
                for (hash, rules) in new.resource_rules {
                    existing.resource_rules.entry(hash).or_insert(rules);
                }
            }
            (Vertex::Edge(existing), Vertex::Edge(new)) => {
                for rule in new.rules {
                    if !existing.rules.contains(&rule) {
                        existing.rules.push(rule);
                    }
                }
            }
            _ => {}
        }
    }

    /// Rewrite `old` to `new` in the vertex's own data (the key rewrite is
    /// handled separately by the evaluator).
    pub fn rewrite_id(&mut self, old: &ResourceId, new: &ResourceId) {
        let fix_edge = |edge: &mut SimpleEdge| {
            if &edge.source == old {
                edge.source = new.clone();
            }
            if &edge.target == old {
                edge.target = new.clone();
            }
        };
        match self {
            Vertex::Property(v) => {
                if &v.ref_.resource == old {
                    v.ref_.resource = new.clone();
                }
                let rules = std::mem::take(&mut v.edge_rules);
                for (mut edge, bucket) in rules {
                    fix_edge(&mut edge);
                    v.edge_rules.insert(edge, bucket);
                }
            }
            Vertex::Edge(v) => fix_edge(&mut v.edge),
            Vertex::ResourceRule(v) => {
                if &v.resource == old {
                    v.resource = new.clone();
                }
            }
            Vertex::PathExpand(v) => fix_edge(&mut v.edge),
        }
    }
}

/// Additions produced by dependency computation or vertex evaluation,
/// merged into the evaluator by [`crate::eval::Evaluator::enqueue`].
#[derive(Debug, Default)]
pub struct Changes {
    pub nodes: Vec<Vertex>,
    pub edges: Vec<(Key, Key)>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, vertex: Vertex) {
        self.nodes.push(vertex);
    }

    pub fn add_edge(&mut self, from: Key, to: Key) {
        if from != to && !self.edges.contains(&(from.clone(), to.clone())) {
            self.edges.push((from, to));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Adjacency map over keys; `deps[k]` is the set of keys `k` waits on.
#[derive(Debug, Clone, Default)]
pub struct WorkGraph {
    deps: IndexMap<Key, IndexSet<Key>>,
}

impl WorkGraph {
    pub fn add_node(&mut self, key: Key) {
        self.deps.entry(key).or_default();
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.deps.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Add a dependency edge; both endpoints must already be nodes.
    pub fn add_edge(&mut self, from: &Key, to: &Key) {
        if from == to || !self.deps.contains_key(to) {
            return;
        }
        if let Some(set) = self.deps.get_mut(from) {
            set.insert(to.clone());
        }
    }

    pub fn remove_node(&mut self, key: &Key) {
        self.deps.shift_remove(key);
        for set in self.deps.values_mut() {
            set.shift_remove(key);
        }
    }

    /// Keys with no remaining dependencies, sorted.
    pub fn ready_keys(&self) -> Vec<Key> {
        let mut out: Vec<Key> = self
            .deps
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        out.sort();
        out
    }

    pub fn keys(&self) -> Vec<Key> {
        let mut out: Vec<Key> = self.deps.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn dependencies_of(&self, key: &Key) -> Vec<Key> {
        let mut out: Vec<Key> = self
            .deps
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Rename a node in place, keeping all incident edges.
    pub fn rename(&mut self, old: &Key, new: Key) {
        if let Some(deps) = self.deps.shift_remove(old) {
            self.deps.insert(new.clone(), deps);
        }
        for set in self.deps.values_mut() {
            if set.shift_remove(old) {
                set.insert(new.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        Key::Property(PropertyRef::new("p:t:a".parse().unwrap(), s.to_string()))
    }

    #[test]
    fn test_ready_requires_empty_deps() {
        let mut g = WorkGraph::default();
        g.add_node(key("a"));
        g.add_node(key("b"));
        g.add_edge(&key("a"), &key("b"));
        assert_eq!(g.ready_keys(), vec![key("b")]);

        g.remove_node(&key("b"));
        assert_eq!(g.ready_keys(), vec![key("a")]);
    }

    #[test]
    fn test_edge_to_missing_node_is_ignored() {
        let mut g = WorkGraph::default();
        g.add_node(key("a"));
        g.add_edge(&key("a"), &key("missing"));
        assert_eq!(g.ready_keys(), vec![key("a")]);
    }

    #[test]
    fn test_rename_keeps_edges() {
        let mut g = WorkGraph::default();
        g.add_node(key("a"));
        g.add_node(key("b"));
        g.add_edge(&key("a"), &key("b"));
        g.rename(&key("b"), key("c"));
        assert_eq!(g.dependencies_of(&key("a")), vec![key("c")]);
        assert!(!g.contains(&key("b")));
    }

    #[test]
    fn test_property_vertex_merge() {
        let r = PropertyRef::new("p:t:a".parse().unwrap(), "x".to_string());
        let edge = SimpleEdge::new("p:t:a".parse().unwrap(), "p:t:b".parse().unwrap());
        let mut a = Vertex::Property(PropertyVertex {
            ref_: r.clone(),
            template: None,
            edge_rules: IndexMap::new(),
            resource_rules: IndexMap::new(),
        });
        let mut edge_rules = IndexMap::new();
        edge_rules.insert(edge.clone(), vec![OperationalRule::default()]);
        let b = Vertex::Property(PropertyVertex {
            ref_: r,
            template: Some(Property::default()),
            edge_rules,
            resource_rules: IndexMap::new(),
        });
        a.update_from(b);
        match a {
            Vertex::Property(v) => {
                assert!(v.template.is_some());
                assert_eq!(v.edge_rules.len(), 1);
            }
            _ => unreachable!(),
        }
    }
}
