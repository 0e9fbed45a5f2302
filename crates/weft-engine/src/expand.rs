//! Path expansion
//!
//! Replaces a logical edge by a concrete chain of intermediate resources so
//! that a classification (network, permissions, …) is satisfied. Candidate
//! chains come from the knowledge base; selection runs weighted
//! shortest-path over a temporary graph where already-present resources
//! cost less than phantoms, encouraging reuse.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use indexmap::IndexMap;
use tracing::{debug, info};

use weft_construct::{Resource, ResourceId, SimpleEdge, Value};
use weft_kb::{DynamicData, EdgePathSatisfaction, Functionality};

use crate::constraints::{ConstraintOperator, ResourceConstraint};
use crate::error::{Error, Result};
use crate::rule::{selector_is_match, RuleContext};
use crate::solution::SolutionContext;

/// One concrete expansion to run: the resolved endpoints and the
/// classification being satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionInput {
    pub dep: SimpleEdge,
    pub classification: String,
}

/// What an expansion produced: the selected chain and every edge added.
#[derive(Debug, Clone, Default)]
pub struct ExpansionResult {
    pub path: Vec<ResourceId>,
    pub created: Vec<ResourceId>,
    pub edges: Vec<SimpleEdge>,
}

/// Resolve a satisfaction's property references into the real expansion
/// endpoints. A reference chain like `network#subnet` walks property values
/// and may fan out into several endpoints.
pub fn determine_satisfaction_inputs(
    sol: &SolutionContext,
    satisfaction: &EdgePathSatisfaction,
    edge: &SimpleEdge,
) -> Result<Vec<ExpansionInput>> {
    let sources = resolve_reference(sol, &edge.source, &satisfaction.source_property_reference)?;
    let targets = resolve_reference(sol, &edge.target, &satisfaction.target_property_reference)?;
    let mut inputs = Vec::new();
    for source in &sources {
        for target in &targets {
            if source == target {
                continue;
            }
            inputs.push(ExpansionInput {
                dep: SimpleEdge::new(source.clone(), target.clone()),
                classification: satisfaction.classification.clone(),
            });
        }
    }
    Ok(inputs)
}

fn resolve_reference(
    sol: &SolutionContext,
    start: &ResourceId,
    reference: &str,
) -> Result<Vec<ResourceId>> {
    if reference.is_empty() {
        return Ok(vec![start.clone()]);
    }
    let ctx = sol.dyn_ctx();
    let mut current = vec![start.clone()];
    for part in reference.split('#') {
        let mut next = Vec::new();
        for id in &current {
            let value = ctx.field_value(part, id)?;
            collect_endpoint_ids(&value, &mut next);
        }
        current = next;
    }
    Ok(current)
}

fn collect_endpoint_ids(value: &Value, out: &mut Vec<ResourceId>) {
    match value {
        Value::Id(id) => {
            if !out.contains(id) {
                out.push(id.clone());
            }
        }
        Value::Ref(r) => {
            if !out.contains(&r.resource) {
                out.push(r.resource.clone());
            }
        }
        Value::List(items) => {
            for v in items {
                collect_endpoint_ids(v, out);
            }
        }
        Value::Set(set) => {
            for v in set.iter() {
                collect_endpoint_ids(v, out);
            }
        }
        _ => {}
    }
}

/// A node in the temporary path-selection graph: a concrete resource from
/// the solution, or a phantom (name-less id) standing in for a type that
/// would have to be created.
fn is_phantom(id: &ResourceId) -> bool {
    id.name.is_empty()
}

struct SelectionGraph {
    /// adjacency: node → (successor, edge cost)
    adj: IndexMap<ResourceId, Vec<(ResourceId, i64)>>,
}

const BASE_EDGE_COST: i64 = 2;
const PHANTOM_PENALTY: i64 = 1;

fn build_selection_graph(
    sol: &SolutionContext,
    input: &ExpansionInput,
) -> SelectionGraph {
    let kb = sol.kb();
    let src_type = input.dep.source.qualified_type_name();
    let tgt_type = input.dep.target.qualified_type_name();

    let eligible = |qtn: &str| -> bool {
        if qtn == src_type || qtn == tgt_type {
            return true;
        }
        let Some(template) = kb.get_template_by_type(qtn) else {
            return false;
        };
        if template.functionality() != Functionality::Unknown {
            return false;
        }
        input.classification.is_empty()
            || template.classification.is.contains(&input.classification)
    };

    // candidate nodes per type: concrete resources already in the solution
    // plus one phantom, except for the endpoint types (endpoints are fixed)
    let mut candidates: IndexMap<String, Vec<ResourceId>> = IndexMap::new();
    candidates
        .entry(src_type.clone())
        .or_default()
        .push(input.dep.source.clone());
    candidates
        .entry(tgt_type.clone())
        .or_default()
        .push(input.dep.target.clone());
    for template in kb.list_resources() {
        let qtn = template.qualified_type_name.clone();
        if candidates.contains_key(&qtn) || !eligible(&qtn) {
            continue;
        }
        let mut nodes: Vec<ResourceId> = sol
            .graph()
            .resource_ids()
            .into_iter()
            .filter(|id| id.qualified_type_name() == qtn)
            .collect();
        nodes.sort();
        nodes.push(template.id()); // the phantom
        candidates.insert(qtn, nodes);
    }

    let mut adj: IndexMap<ResourceId, Vec<(ResourceId, i64)>> = IndexMap::new();
    for nodes in candidates.values() {
        for node in nodes {
            adj.entry(node.clone()).or_default();
        }
    }
    for (key, template) in kb.edge_templates() {
        let (from_type, to_type) = (&key.0, &key.1);
        if template.direct_edge_only && !(from_type == &src_type && to_type == &tgt_type) {
            continue;
        }
        let (Some(from_nodes), Some(to_nodes)) =
            (candidates.get(from_type), candidates.get(to_type))
        else {
            continue;
        };
        for from in from_nodes {
            for to in to_nodes {
                if from == to {
                    continue;
                }
                let mut cost = BASE_EDGE_COST + template.weight;
                if is_phantom(from) {
                    cost += PHANTOM_PENALTY;
                }
                if is_phantom(to) {
                    cost += PHANTOM_PENALTY;
                }
                // an edge already present in the solution is free to keep
                if !is_phantom(from)
                    && !is_phantom(to)
                    && sol.graph().has_edge(from, to)
                {
                    cost -= 1;
                }
                adj.get_mut(from)
                    .expect("candidate nodes were inserted above")
                    .push((to.clone(), cost.max(0)));
            }
        }
    }
    for succs in adj.values_mut() {
        succs.sort_by(|a, b| a.0.cmp(&b.0));
    }
    SelectionGraph { adj }
}

/// Deterministic Dijkstra: ties broken by the text form of the id path.
fn select_path(
    graph: &SelectionGraph,
    source: &ResourceId,
    target: &ResourceId,
) -> Option<Vec<ResourceId>> {
    let mut dist: IndexMap<ResourceId, (i64, Option<ResourceId>)> = IndexMap::new();
    let mut heap: BinaryHeap<Reverse<(i64, String)>> = BinaryHeap::new();
    dist.insert(source.clone(), (0, None));
    heap.push(Reverse((0, source.to_string())));

    let by_string = |s: &str| -> Option<ResourceId> {
        graph.adj.keys().find(|k| k.to_string() == s).cloned()
    };

    while let Some(Reverse((cost, node_str))) = heap.pop() {
        let Some(node) = by_string(&node_str) else {
            continue;
        };
        let Some(&(best, _)) = dist.get(&node) else {
            continue;
        };
        if cost > best {
            continue;
        }
        if &node == target {
            break;
        }
        let Some(succs) = graph.adj.get(&node) else {
            continue;
        };
        for (succ, edge_cost) in succs {
            let next_cost = cost + edge_cost;
            let better = match dist.get(succ) {
                None => true,
                Some((existing, _)) => next_cost < *existing,
            };
            if better {
                dist.insert(succ.clone(), (next_cost, Some(node.clone())));
                heap.push(Reverse((next_cost, succ.to_string())));
            }
        }
    }

    dist.get(target)?;
    let mut path = vec![target.clone()];
    let mut current = target.clone();
    while let Some((_, Some(prev))) = dist.get(&current).cloned() {
        path.push(prev.clone());
        current = prev;
    }
    path.reverse();
    (path.first() == Some(source)).then_some(path)
}

/// Run one expansion: select the chain, materialise phantoms, wire edges,
/// and drop the placeholder direct edge when the chain is longer than one
/// hop.
pub fn expand_edge(sol: &mut SolutionContext, input: &ExpansionInput) -> Result<ExpansionResult> {
    let src = input.dep.source.clone();
    let tgt = input.dep.target.clone();
    if !sol.graph().contains(&src) {
        return Err(Error::Construct(weft_construct::Error::ResourceNotFound(src)));
    }
    if !sol.graph().contains(&tgt) {
        return Err(Error::Construct(weft_construct::Error::ResourceNotFound(tgt)));
    }

    let selection = build_selection_graph(sol, input);
    let Some(selected) = select_path(&selection, &src, &tgt) else {
        return Err(Error::Expansion {
            edge: input.dep.clone(),
            classification: input.classification.clone(),
            message: "no candidate path in the knowledge base".to_string(),
        });
    };

    let mut result = ExpansionResult::default();
    // materialise phantoms with deterministic names
    for node in &selected {
        if !is_phantom(node) {
            result.path.push(node.clone());
            continue;
        }
        let base = format!("{}-{}-{}", src.name, node.r#type, tgt.name);
        let mut name = base.clone();
        let mut suffix = 2;
        let id = loop {
            let candidate = ResourceId::new(&node.provider, &node.r#type, &name);
            if !sol.graph().contains(&candidate) {
                break candidate;
            }
            name = format!("{base}-{suffix}");
            suffix += 1;
        };
        info!(resource = %id, edge = %input.dep, "materialising intermediate");
        sol.operational_view().add_resource(Resource::new(id.clone()))?;
        result.created.push(id.clone());
        result.path.push(id);
    }

    for pair in result.path.windows(2) {
        sol.operational_view().add_edge(&pair[0], &pair[1])?;
        result.edges.push(SimpleEdge::new(pair[0].clone(), pair[1].clone()));
    }

    if result.path.len() > 2 && sol.graph().has_edge(&src, &tgt) {
        debug!(edge = %input.dep, "removing placeholder direct edge");
        sol.operational_view().remove_edge(&src, &tgt);
    }
    Ok(result)
}

/// Configure the properties of the chain: any property whose operational
/// step points at another chain member gets its field set to the concrete
/// id. Returns the id rewrites the field writes produced.
pub fn handle_result_properties(
    sol: &mut SolutionContext,
    result: &ExpansionResult,
) -> Result<Vec<(ResourceId, ResourceId)>> {
    use weft_kb::Direction;

    let mut updates = Vec::new();
    for id in &result.path {
        let Ok(template) = sol.kb().get_resource_template(id) else {
            continue;
        };
        let mut step_properties = Vec::new();
        template.loop_properties(|p| {
            if let Some(rule) = &p.operational_rule {
                if let Some(step) = &rule.step {
                    if !step.resources.is_empty() {
                        step_properties.push((p.clone(), step.clone()));
                    }
                }
            }
            true
        });

        let downstream: Vec<ResourceId> = result
            .edges
            .iter()
            .filter(|e| &e.source == id)
            .map(|e| e.target.clone())
            .collect();
        let upstream: Vec<ResourceId> = result
            .edges
            .iter()
            .filter(|e| &e.target == id)
            .map(|e| e.source.clone())
            .collect();

        for (property, step) in step_properties {
            let neighbours = match step.direction {
                Direction::Downstream => &downstream,
                Direction::Upstream => &upstream,
            };
            for neighbour in neighbours {
                let Some(candidate) = sol.graph().get(neighbour) else {
                    continue;
                };
                let candidate = candidate.clone();
                let data = DynamicData::for_resource(id.clone());
                let matched = step
                    .resources
                    .iter()
                    .map(|sel| selector_is_match(sol, &data, sel, &candidate))
                    .collect::<Result<Vec<bool>>>()?
                    .into_iter()
                    .any(|m| m);
                if !matched {
                    continue;
                }
                let mut ctx = RuleContext::with_property(property.clone(), data);
                ctx.set_field(sol, id, neighbour, &step)?;
                if let Some(update) = ctx.pending_id_update {
                    updates.push(update);
                }
            }
        }
    }
    Ok(updates)
}

/// Apply the consumed/emitted declarations between the expansion endpoints
/// as synthesized add-constraints, so the consumer property is set once the
/// producer's property resolves.
pub fn consume_expansion_properties(
    sol: &mut SolutionContext,
    input: &ExpansionInput,
) -> Result<()> {
    let delays = {
        let source = sol.graph().require(&input.dep.source)?.clone();
        let target = sol.graph().require(&input.dep.target)?.clone();
        let ctx = sol.dyn_ctx();
        sol.kb().consume_from_resource(&ctx, &source, &target)?
    };
    for delay in delays {
        debug!(resource = %delay.resource, property = %delay.property_path,
            "synthesizing add-constraint from consumption");
        sol.constraints_mut().resource.push(ResourceConstraint {
            operator: ConstraintOperator::Add,
            target: delay.resource,
            property: delay.property_path,
            value: delay.value,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintList;
    use weft_kb::{EdgeTemplate, KnowledgeBase, ResourceTemplate};

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn kb_api_auth_compute() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        let mut api = ResourceTemplate::new("api:g");
        api.classification.is = vec!["api".into()];
        kb.add_resource_template(api);
        let mut auth = ResourceTemplate::new("auth:r");
        auth.classification.is = vec!["permissions".into()];
        kb.add_resource_template(auth);
        let mut compute = ResourceTemplate::new("compute:c");
        compute.classification.is = vec!["compute".into()];
        kb.add_resource_template(compute);
        kb.add_edge_template(EdgeTemplate {
            source: id("api:g"),
            target: id("auth:r"),
            ..Default::default()
        });
        kb.add_edge_template(EdgeTemplate {
            source: id("auth:r"),
            target: id("compute:c"),
            ..Default::default()
        });
        kb
    }

    #[test]
    fn test_expansion_inserts_intermediate() {
        let mut sol = SolutionContext::new(kb_api_auth_compute(), ConstraintList::default());
        sol.raw_view().add_resource(Resource::new(id("api:g:x"))).unwrap();
        sol.raw_view().add_resource(Resource::new(id("compute:c:y"))).unwrap();
        sol.raw_view().add_edge(&id("api:g:x"), &id("compute:c:y")).unwrap();

        let input = ExpansionInput {
            dep: SimpleEdge::new(id("api:g:x"), id("compute:c:y")),
            classification: "permissions".into(),
        };
        let result = expand_edge(&mut sol, &input).unwrap();

        let auth = id("auth:r:x-r-y");
        assert_eq!(result.path, vec![id("api:g:x"), auth.clone(), id("compute:c:y")]);
        assert!(sol.graph().has_edge(&id("api:g:x"), &auth));
        assert!(sol.graph().has_edge(&auth, &id("compute:c:y")));
        // placeholder removed
        assert!(!sol.graph().has_edge(&id("api:g:x"), &id("compute:c:y")));
    }

    #[test]
    fn test_expansion_reuses_existing_intermediate() {
        let mut sol = SolutionContext::new(kb_api_auth_compute(), ConstraintList::default());
        sol.raw_view().add_resource(Resource::new(id("api:g:x"))).unwrap();
        sol.raw_view().add_resource(Resource::new(id("auth:r:shared"))).unwrap();
        sol.raw_view().add_resource(Resource::new(id("compute:c:y"))).unwrap();

        let input = ExpansionInput {
            dep: SimpleEdge::new(id("api:g:x"), id("compute:c:y")),
            classification: "permissions".into(),
        };
        let result = expand_edge(&mut sol, &input).unwrap();
        assert_eq!(
            result.path,
            vec![id("api:g:x"), id("auth:r:shared"), id("compute:c:y")]
        );
        assert!(result.created.is_empty());
    }

    #[test]
    fn test_expansion_fails_without_kb_path() {
        let mut kb = KnowledgeBase::new();
        kb.add_resource_template(ResourceTemplate::new("p:a"));
        kb.add_resource_template(ResourceTemplate::new("p:b"));
        let mut sol = SolutionContext::new(kb, ConstraintList::default());
        sol.raw_view().add_resource(Resource::new(id("p:a:1"))).unwrap();
        sol.raw_view().add_resource(Resource::new(id("p:b:1"))).unwrap();

        let input = ExpansionInput {
            dep: SimpleEdge::new(id("p:a:1"), id("p:b:1")),
            classification: String::new(),
        };
        assert!(matches!(
            expand_edge(&mut sol, &input),
            Err(Error::Expansion { .. })
        ));
    }
}
