//! Dependency layers
//!
//! When an operational step asks for "the upstream resources" of a node,
//! the answer depends on how far to look: only direct side-effects, only
//! glue, up to the first functional resource, or everything reachable.

use weft_construct::{ResourceGraph, ResourceId, Value, WalkControl};

use crate::classification::Functionality;
use crate::kb::KnowledgeBase;
use crate::rule::ResourceSelector;

/// How far [`upstream`]/[`downstream`] walk from the target resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyLayer {
    /// Unique operational side-effects of the resource, transitively.
    Local,
    /// Direct neighbours only.
    Direct,
    /// Glue resources only; stops at any functional resource.
    Glue,
    /// Glue plus the first functional resource on each path.
    FirstFunctional,
    /// Everything reachable.
    All,
}

pub fn downstream(
    graph: &ResourceGraph,
    kb: &KnowledgeBase,
    id: &ResourceId,
    layer: DependencyLayer,
) -> Vec<ResourceId> {
    collect(graph, kb, id, layer, false)
}

pub fn upstream(
    graph: &ResourceGraph,
    kb: &KnowledgeBase,
    id: &ResourceId,
    layer: DependencyLayer,
) -> Vec<ResourceId> {
    collect(graph, kb, id, layer, true)
}

fn collect(
    graph: &ResourceGraph,
    kb: &KnowledgeBase,
    id: &ResourceId,
    layer: DependencyLayer,
    up: bool,
) -> Vec<ResourceId> {
    if layer == DependencyLayer::Direct {
        return if up {
            graph.upstream(id)
        } else {
            graph.downstream(id)
        };
    }
    let mut out: Vec<ResourceId> = Vec::new();
    let visit = |path: &[ResourceId]| -> WalkControl {
        let last = path.last().expect("walk path is never empty");
        match layer {
            DependencyLayer::Local => {
                let prev = &path[path.len() - 2];
                if is_operational_side_effect(graph, kb, prev, last) {
                    out.push(last.clone());
                    WalkControl::Continue
                } else {
                    WalkControl::SkipPath
                }
            }
            DependencyLayer::Glue => {
                if kb.get_functionality(last) == Functionality::Unknown {
                    out.push(last.clone());
                    WalkControl::Continue
                } else {
                    WalkControl::SkipPath
                }
            }
            DependencyLayer::FirstFunctional => {
                out.push(last.clone());
                if kb.get_functionality(last) == Functionality::Unknown {
                    WalkControl::Continue
                } else {
                    WalkControl::SkipPath
                }
            }
            DependencyLayer::All | DependencyLayer::Direct => {
                out.push(last.clone());
                WalkControl::Continue
            }
        }
    };
    if up {
        graph.walk_up(id, visit);
    } else {
        graph.walk_down(id, visit);
    }
    // a resource can be reached along several paths
    let mut deduped = Vec::with_capacity(out.len());
    for id in out {
        if !deduped.contains(&id) {
            deduped.push(id);
        }
    }
    deduped
}

/// Structural selector match: the id filter and classification requirements,
/// deliberately ignoring explicit names so renamed side-effects still count.
pub fn selector_matches_type(
    kb: &KnowledgeBase,
    selector: &ResourceSelector,
    candidate: &ResourceId,
) -> bool {
    if !selector.selector.is_empty() && !selector.selector.contains("{{") {
        if let Ok(filter) = selector.selector.parse::<ResourceId>() {
            let type_filter = ResourceId {
                provider: filter.provider,
                r#type: filter.r#type,
                namespace: String::new(),
                name: String::new(),
            };
            if !type_filter.matches(candidate) {
                return false;
            }
        }
    }
    if !selector.classifications.is_empty() {
        match kb.get_template_by_type(&candidate.qualified_type_name()) {
            Some(t) => {
                if !t.contains_classifications(&selector.classifications) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

/// Is `side_effect` something `rid`'s operational rules created for their own
/// use? True when a step selector matches it by type, a path exists in the
/// step's direction, and the owning property actually references it.
pub fn is_operational_side_effect(
    graph: &ResourceGraph,
    kb: &KnowledgeBase,
    rid: &ResourceId,
    side_effect: &ResourceId,
) -> bool {
    let Ok(template) = kb.get_resource_template(rid) else {
        return false;
    };
    let Some(resource) = graph.get(rid) else {
        return false;
    };

    let mut result = false;
    template.loop_properties(|property| {
        let Some(rule) = &property.operational_rule else {
            return true;
        };
        let Some(step) = &rule.step else {
            return true;
        };
        if step.resources.is_empty() {
            return true;
        }
        let matched = step
            .resources
            .iter()
            .any(|sel| selector_matches_type(kb, sel, side_effect));
        if !matched {
            return true;
        }

        let connected = match step.direction {
            crate::rule::Direction::Upstream => graph.shortest_path(side_effect, rid).is_some(),
            crate::rule::Direction::Downstream => graph.shortest_path(rid, side_effect).is_some(),
        };
        if !connected {
            return true;
        }

        let Ok(path) = property.path.parse::<weft_construct::PropertyPath>() else {
            return true;
        };
        let Ok(Some(value)) = resource.get_property(&path) else {
            return true;
        };
        if value_references(value, side_effect) {
            result = true;
            return false;
        }
        true
    });
    result
}

fn value_references(value: &Value, id: &ResourceId) -> bool {
    match value {
        Value::Id(v) => v == id,
        Value::Ref(r) => &r.resource == id,
        Value::List(items) => items.iter().any(|v| value_references(v, id)),
        Value::Set(set) => set.iter().any(|v| value_references(v, id)),
        Value::Map(map) => map.values().any(|v| value_references(v, id)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ResourceTemplate;
    use weft_construct::Resource;

    fn kb_with(types: &[(&str, &[&str])]) -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        for (name, is) in types {
            let mut t = ResourceTemplate::new(name);
            t.classification.is = is.iter().map(|s| s.to_string()).collect();
            kb.add_resource_template(t);
        }
        kb
    }

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn test_glue_layer_stops_at_functional() {
        let kb = kb_with(&[
            ("p:fn", &["compute"]),
            ("p:role", &[]),
            ("p:policy", &[]),
            ("p:bucket", &["storage"]),
        ]);
        let mut g = ResourceGraph::new();
        for r in ["p:fn:f", "p:role:r", "p:policy:p", "p:bucket:b"] {
            g.add_resource(Resource::new(id(r))).unwrap();
        }
        g.add_edge(&id("p:fn:f"), &id("p:role:r")).unwrap();
        g.add_edge(&id("p:role:r"), &id("p:policy:p")).unwrap();
        g.add_edge(&id("p:policy:p"), &id("p:bucket:b")).unwrap();

        let glue = downstream(&g, &kb, &id("p:fn:f"), DependencyLayer::Glue);
        assert_eq!(glue, vec![id("p:role:r"), id("p:policy:p")]);

        let first = downstream(&g, &kb, &id("p:fn:f"), DependencyLayer::FirstFunctional);
        assert_eq!(
            first,
            vec![id("p:role:r"), id("p:policy:p"), id("p:bucket:b")]
        );
    }

    #[test]
    fn test_direct_layer() {
        let kb = kb_with(&[("p:a", &[]), ("p:b", &[])]);
        let mut g = ResourceGraph::new();
        g.add_resource(Resource::new(id("p:a:1"))).unwrap();
        g.add_resource(Resource::new(id("p:b:1"))).unwrap();
        g.add_edge(&id("p:a:1"), &id("p:b:1")).unwrap();
        assert_eq!(
            downstream(&g, &kb, &id("p:a:1"), DependencyLayer::Direct),
            vec![id("p:b:1")]
        );
        assert_eq!(
            upstream(&g, &kb, &id("p:b:1"), DependencyLayer::Direct),
            vec![id("p:a:1")]
        );
    }
}
