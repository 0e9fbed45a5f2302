//! Vertex identity
//!
//! Every unit of pending work has a [`Key`]. The derived ordering (variant
//! tag first, then lexicographic fields) is the deterministic evaluation
//! order within a group; do not reorder the variants.

use std::fmt;

use weft_construct::{PropertyRef, ResourceId, SimpleEdge};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Property(PropertyRef),
    Edge(SimpleEdge),
    ResourceRule {
        resource: ResourceId,
        rule_hash: String,
    },
    PathExpand {
        edge: SimpleEdge,
        classification: String,
    },
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Property(r) => write!(f, "{r}"),
            Key::Edge(e) => write!(f, "{e}"),
            Key::ResourceRule { resource, rule_hash } => {
                write!(f, "{resource} rule:{rule_hash}")
            }
            Key::PathExpand {
                edge,
                classification,
            } => {
                if classification.is_empty() {
                    write!(f, "expand {edge}")
                } else {
                    write!(f, "expand {edge} <{classification}>")
                }
            }
        }
    }
}

impl Key {
    /// Rewrite any occurrence of `old` in the key to `new`; `None` when the
    /// key does not mention `old`.
    pub fn with_updated_id(&self, old: &ResourceId, new: &ResourceId) -> Option<Key> {
        let update_edge = |edge: &SimpleEdge| -> Option<SimpleEdge> {
            if &edge.source != old && &edge.target != old {
                return None;
            }
            let mut updated = edge.clone();
            if &updated.source == old {
                updated.source = new.clone();
            }
            if &updated.target == old {
                updated.target = new.clone();
            }
            Some(updated)
        };
        match self {
            Key::Property(r) => (&r.resource == old).then(|| {
                Key::Property(PropertyRef::new(new.clone(), r.property.clone()))
            }),
            Key::Edge(e) => update_edge(e).map(Key::Edge),
            Key::ResourceRule {
                resource,
                rule_hash,
            } => (resource == old).then(|| Key::ResourceRule {
                resource: new.clone(),
                rule_hash: rule_hash.clone(),
            }),
            Key::PathExpand {
                edge,
                classification,
            } => update_edge(edge).map(|edge| Key::PathExpand {
                edge,
                classification: classification.clone(),
            }),
        }
    }
}

/// Readiness tier of a candidate vertex; only the best tier present runs in
/// a group. The order is load-bearing: `ReadyNow` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyPriority {
    ReadyNow,
    NotReadyLow,
    NotReadyMid,
    NotReadyHigh,
    NotReadyMax,
}

impl fmt::Display for ReadyPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadyPriority::ReadyNow => "ready",
            ReadyPriority::NotReadyLow => "not-ready-low",
            ReadyPriority::NotReadyMid => "not-ready-mid",
            ReadyPriority::NotReadyHigh => "not-ready-high",
            ReadyPriority::NotReadyMax => "not-ready-max",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn test_key_order_by_tag_then_id() {
        let prop = Key::Property(PropertyRef::new(id("z:z:z"), "p"));
        let edge = Key::Edge(SimpleEdge::new(id("a:a:a"), id("a:a:b")));
        assert!(prop < edge);

        let a = Key::Property(PropertyRef::new(id("p:t:a"), "x"));
        let b = Key::Property(PropertyRef::new(id("p:t:b"), "a"));
        assert!(a < b);
    }

    #[test]
    fn test_priority_order() {
        assert!(ReadyPriority::ReadyNow < ReadyPriority::NotReadyLow);
        assert!(ReadyPriority::NotReadyMid < ReadyPriority::NotReadyMax);
    }

    #[test]
    fn test_with_updated_id() {
        let key = Key::Property(PropertyRef::new(id("p:t:a"), "x"));
        let updated = key
            .with_updated_id(&id("p:t:a"), &id("p:t:ns:a"))
            .unwrap();
        assert_eq!(
            updated,
            Key::Property(PropertyRef::new(id("p:t:ns:a"), "x"))
        );
        assert!(key.with_updated_id(&id("p:t:zzz"), &id("p:t:q")).is_none());
    }
}
