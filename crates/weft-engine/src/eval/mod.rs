//! The evaluator
//!
//! Owns the work graph of pending vertices and drives evaluation group by
//! group: poll the ready tier, evaluate in sorted key order, then
//! recalculate dependencies so work discovered mid-group reshapes the next
//! group's topology.

pub mod dot;
pub mod edge;
pub mod key;
pub mod path_expand;
pub mod property;
pub mod resource_rule;
pub mod vertex;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info, trace};

use weft_construct::{PropertyPath, PropertyRef, ResourceId, SimpleEdge, Value};
use weft_kb::Direction;

use crate::decisions::Decision;
use crate::error::{Error, Result};
use crate::solution::{OpEvent, SolutionContext};

pub use key::{Key, ReadyPriority};
pub use vertex::{
    Changes, EdgeVertex, PathExpandVertex, PropertyVertex, ResourceRuleVertex, Vertex, WorkGraph,
};

pub struct Evaluator {
    pub(crate) sol: SolutionContext,
    vertices: IndexMap<Key, Vertex>,
    /// Every vertex ever known; retained after evaluation for diagnostics.
    graph: WorkGraph,
    /// Vertices that have not yet evaluated; scheduling reads this.
    unevaluated: WorkGraph,
    evaluated_order: Vec<Vec<Key>>,
    errored: IndexSet<Key>,
}

impl Evaluator {
    pub fn new(sol: SolutionContext) -> Self {
        Self {
            sol,
            vertices: IndexMap::new(),
            graph: WorkGraph::default(),
            unevaluated: WorkGraph::default(),
            evaluated_order: Vec::new(),
            errored: IndexSet::new(),
        }
    }

    pub fn solution(&self) -> &SolutionContext {
        &self.sol
    }

    pub fn solution_mut(&mut self) -> &mut SolutionContext {
        &mut self.sol
    }

    pub fn into_solution(self) -> SolutionContext {
        self.sol
    }

    pub fn evaluated_order(&self) -> &[Vec<Key>] {
        &self.evaluated_order
    }

    pub fn errored(&self) -> &IndexSet<Key> {
        &self.errored
    }

    pub(crate) fn vertex_mut(&mut self, key: &Key) -> Option<&mut Vertex> {
        self.vertices.get_mut(key)
    }

    pub fn is_evaluated(&self, key: &Key) -> bool {
        self.graph.contains(key) && !self.unevaluated.contains(key)
    }

    /// Merge changes into the work graphs. Nodes whose key already exists
    /// merge via `update_from`; edges to already-evaluated targets are
    /// trivially satisfied and recorded only in the persistent graph.
    pub fn enqueue(&mut self, changes: Changes) -> Result<()> {
        let mut pending = vec![changes];
        while let Some(changes) = pending.pop() {
            let mut new_keys = Vec::new();
            for node in changes.nodes {
                let node_key = node.key();
                match self.vertices.get_mut(&node_key) {
                    Some(existing) => existing.update_from(node),
                    None => {
                        trace!(key = %node_key, "adding vertex");
                        self.vertices.insert(node_key.clone(), node);
                        self.graph.add_node(node_key.clone());
                        self.unevaluated.add_node(node_key.clone());
                        new_keys.push(node_key);
                    }
                }
            }
            for (from, to) in changes.edges {
                self.graph.add_edge(&from, &to);
                self.unevaluated.add_edge(&from, &to);
            }
            for node_key in new_keys {
                let deps = self.vertex_dependencies(&node_key)?;
                if !deps.is_empty() {
                    pending.push(deps);
                }
            }
        }
        Ok(())
    }

    /// Enqueue the property and resource-rule vertices for resources.
    pub fn add_resources(&mut self, ids: &[ResourceId]) -> Result<()> {
        let mut changes = Changes::new();
        for id in ids {
            let Some(resource) = self.sol.graph().get(id) else {
                continue;
            };
            let Ok(template) = self.sol.kb().get_resource_template(id) else {
                debug!(resource = %id, "no template, skipping vertex creation");
                continue;
            };
            let resource = resource.clone();
            let template = template.clone();

            for property in template.properties.values() {
                collect_property_vertices(&resource, property, &mut changes);
            }
            for rule in &template.operational_rules {
                changes.add_node(Vertex::ResourceRule(ResourceRuleVertex {
                    resource: id.clone(),
                    rule: rule.clone(),
                    rule_hash: rule.hash_key(),
                }));
            }
        }
        self.enqueue(changes)
    }

    /// Enqueue the path-expansion and edge-rule vertices for edges.
    pub fn add_edges(&mut self, edges: &[SimpleEdge]) -> Result<()> {
        let mut changes = Changes::new();
        for edge in edges {
            for satisfaction in self
                .sol
                .kb()
                .get_path_satisfactions_from_edge(&edge.source, &edge.target)
            {
                changes.add_node(Vertex::PathExpand(PathExpandVertex {
                    edge: edge.clone(),
                    satisfaction,
                }));
            }
            if let Some(template) = self.sol.kb().get_edge_template(&edge.source, &edge.target) {
                if !template.operational_rules.is_empty() {
                    changes.add_node(Vertex::Edge(EdgeVertex {
                        edge: edge.clone(),
                        rules: template.operational_rules.clone(),
                        distributed: IndexSet::new(),
                    }));
                }
            }
        }
        self.enqueue(changes)
    }

    /// Drain operational-view events into new work.
    pub(crate) fn drain_events(&mut self) -> Result<()> {
        loop {
            let events = self.sol.take_events();
            if events.is_empty() {
                return Ok(());
            }
            for event in events {
                match event {
                    OpEvent::ResourceAdded(id) => self.add_resources(&[id])?,
                    OpEvent::EdgeAdded(edge) => self.add_edges(&[edge])?,
                    OpEvent::EdgeRemoved(edge) => self.clear_owned_properties(&edge)?,
                }
            }
        }
    }

    /// On operational edge removal, clear property values whose operational
    /// step owned that edge.
    fn clear_owned_properties(&mut self, edge: &SimpleEdge) -> Result<()> {
        for (owner, other, direction) in [
            (&edge.source, &edge.target, Direction::Downstream),
            (&edge.target, &edge.source, Direction::Upstream),
        ] {
            let Ok(template) = self.sol.kb().get_resource_template(owner) else {
                continue;
            };
            let mut owned_paths = Vec::new();
            template.loop_properties(|p| {
                if let Some(rule) = &p.operational_rule {
                    if let Some(step) = &rule.step {
                        if step.direction == direction && !step.resources.is_empty() {
                            owned_paths.push(p.path.clone());
                        }
                    }
                }
                true
            });
            for path_str in owned_paths {
                let path: PropertyPath =
                    path_str.parse().map_err(weft_construct::Error::from)?;
                let Some(resource) = self.sol.graph().get(owner) else {
                    continue;
                };
                let Ok(Some(value)) = resource.get_property(&path) else {
                    continue;
                };
                let value = value.clone();
                let referencing = |v: &Value| match v {
                    Value::Id(id) => id == other,
                    Value::Ref(r) => &r.resource == other,
                    _ => false,
                };
                let mut view = self.sol.raw_view();
                let Some(res_mut) = view.get_mut(owner) else {
                    continue;
                };
                match &value {
                    v if referencing(v) => {
                        debug!(resource = %owner, property = %path_str,
                            "clearing property after edge removal");
                        res_mut.remove_property(&path, None)?;
                    }
                    Value::List(items) => {
                        for item in items.iter().filter(|v| referencing(v)) {
                            res_mut.remove_property(&path, Some(item.clone()))?;
                        }
                    }
                    Value::Set(set) => {
                        for item in set.iter().filter(|v| referencing(v)) {
                            res_mut.remove_property(&path, Some(item.clone()))?;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// The main loop: drain ready groups until no work remains.
    pub fn evaluate(&mut self) -> Result<()> {
        let outcome = self.run_loop();
        dot::write_debug_graph(self);
        outcome
    }

    fn run_loop(&mut self) -> Result<()> {
        self.drain_events()?;
        loop {
            if self.unevaluated.is_empty() {
                return Ok(());
            }
            // the group is appended first so its number is stable while the
            // group runs
            self.evaluated_order.push(Vec::new());
            let group = self.evaluated_order.len();
            let ready = self.poll_ready();
            if ready.is_empty() {
                return Err(self.stuck_error());
            }

            let mut messages = Vec::new();
            for key in ready {
                // an earlier vertex in the group may have removed this one
                if !self.unevaluated.contains(&key) {
                    continue;
                }
                debug!(group, key = %key, "evaluating");
                self.evaluated_order[group - 1].push(key.clone());
                self.unevaluated.remove_node(&key);
                match self.vertex_evaluate(&key) {
                    Ok(()) => self.drain_events()?,
                    // expansion failures error the vertex, not the solve
                    Err(Error::Expansion {
                        edge,
                        classification,
                        message,
                    }) => {
                        self.errored.insert(key.clone());
                        self.sol.record_decision(Decision::Expansion {
                            edge,
                            classification,
                            chosen_path: Vec::new(),
                            error: Some(message),
                        });
                    }
                    Err(e) => {
                        self.errored.insert(key.clone());
                        messages.push(format!("failed to evaluate {key}: {e}"));
                    }
                }
            }
            if !messages.is_empty() {
                return Err(Error::Group { group, messages });
            }
            self.recalculate_unevaluated()?;
        }
    }

    /// Candidate-ready vertices of the best readiness tier, in sorted key
    /// order.
    fn poll_ready(&mut self) -> Vec<Key> {
        let candidates = self.unevaluated.ready_keys();
        let mut tiers: IndexMap<ReadyPriority, Vec<Key>> = IndexMap::new();
        for key in candidates {
            let priority = self.vertex_ready(&key);
            tiers.entry(priority).or_default().push(key);
        }
        for priority in [
            ReadyPriority::ReadyNow,
            ReadyPriority::NotReadyLow,
            ReadyPriority::NotReadyMid,
            ReadyPriority::NotReadyHigh,
            ReadyPriority::NotReadyMax,
        ] {
            if let Some(mut keys) = tiers.shift_remove(&priority) {
                if !keys.is_empty() {
                    keys.sort();
                    trace!(%priority, count = keys.len(), "dequeued tier");
                    return keys;
                }
            }
        }
        Vec::new()
    }

    /// Recompute every unevaluated vertex's dependencies against the new
    /// solution state. Evaluations may have "opened up" template reads that
    /// could not resolve before.
    pub fn recalculate_unevaluated(&mut self) -> Result<()> {
        for key in self.unevaluated.keys() {
            let changes = self.vertex_dependencies(&key)?;
            self.enqueue(changes)?;
        }
        Ok(())
    }

    fn stuck_error(&self) -> Error {
        let stuck = self
            .unevaluated
            .keys()
            .into_iter()
            .map(|k| {
                let deps = self
                    .unevaluated
                    .dependencies_of(&k)
                    .into_iter()
                    .map(|d| d.to_string())
                    .collect();
                (k.to_string(), deps)
            })
            .collect();
        Error::CircularDependency { stuck }
    }

    /// Rewrite a resource id everywhere: the solution, vertex data, vertex
    /// keys, the work graphs, and the bookkeeping sets.
    pub fn update_id(&mut self, old: &ResourceId, new: &ResourceId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        info!(old = %old, new = %new, "remapping id across evaluator");
        self.sol.update_id(old, new)?;

        for vertex in self.vertices.values_mut() {
            vertex.rewrite_id(old, new);
        }
        let keys: Vec<Key> = self.vertices.keys().cloned().collect();
        for key in keys {
            let Some(new_key) = key.with_updated_id(old, new) else {
                continue;
            };
            if let Some(moved) = self.vertices.shift_remove(&key) {
                match self.vertices.get_mut(&new_key) {
                    Some(existing) => {
                        existing.update_from(moved);
                        self.graph.remove_node(&key);
                        self.unevaluated.remove_node(&key);
                    }
                    None => {
                        self.vertices.insert(new_key.clone(), moved);
                        self.graph.rename(&key, new_key.clone());
                        self.unevaluated.rename(&key, new_key.clone());
                    }
                }
            }
            if self.errored.shift_remove(&key) {
                self.errored.insert(new_key.clone());
            }
            for group in &mut self.evaluated_order {
                for k in group.iter_mut() {
                    if *k == key {
                        *k = new_key.clone();
                    }
                }
            }
        }
        Ok(())
    }

    /// After a list/set property changes shape, drop pending sub-vertices
    /// whose paths no longer exist on the resource.
    pub(crate) fn cleanup_property_sub_vertices(&mut self, ref_: &PropertyRef) -> Result<()> {
        let Ok(parent_path) = ref_.property.parse::<PropertyPath>() else {
            return Ok(());
        };
        let mut to_remove = Vec::new();
        for key in self.unevaluated.keys() {
            let Key::Property(candidate) = &key else {
                continue;
            };
            if candidate.resource != ref_.resource || candidate.property == ref_.property {
                continue;
            }
            let Ok(candidate_path) = candidate.property.parse::<PropertyPath>() else {
                continue;
            };
            if !candidate_path.starts_with(&parent_path) {
                continue;
            }
            let Some(resource) = self.sol.graph().get(&candidate.resource) else {
                to_remove.push(key.clone());
                continue;
            };
            let gone = match candidate_path.parent() {
                Some(parent) => !matches!(resource.get_property(&parent), Ok(Some(v)) if !v.is_null()),
                None => false,
            };
            if gone {
                to_remove.push(key.clone());
            }
        }
        for key in to_remove {
            debug!(key = %key, "removing stale sub-property vertex");
            self.graph.remove_node(&key);
            self.unevaluated.remove_node(&key);
            self.vertices.shift_remove(&key);
        }
        Ok(())
    }

    fn vertex_dependencies(&mut self, key: &Key) -> Result<Changes> {
        let Some(vertex) = self.vertices.get(key).cloned() else {
            return Ok(Changes::new());
        };
        match vertex {
            Vertex::Property(v) => self.property_dependencies(&v),
            Vertex::Edge(v) => self.edge_dependencies(&v),
            Vertex::ResourceRule(v) => self.resource_rule_dependencies(&v),
            Vertex::PathExpand(v) => self.path_expand_dependencies(&v),
        }
    }

    fn vertex_ready(&self, key: &Key) -> ReadyPriority {
        let Some(vertex) = self.vertices.get(key) else {
            return ReadyPriority::NotReadyMax;
        };
        match vertex {
            Vertex::Property(v) => self.property_ready(v),
            Vertex::Edge(_) => ReadyPriority::ReadyNow,
            Vertex::ResourceRule(_) => ReadyPriority::ReadyNow,
            Vertex::PathExpand(v) => self.path_expand_ready(v),
        }
    }

    fn vertex_evaluate(&mut self, key: &Key) -> Result<()> {
        let Some(vertex) = self.vertices.get(key).cloned() else {
            return Ok(());
        };
        match vertex {
            Vertex::Property(v) => self.evaluate_property(v),
            Vertex::Edge(v) => self.evaluate_edge(v),
            Vertex::ResourceRule(v) => self.evaluate_resource_rule(v),
            Vertex::PathExpand(v) => self.evaluate_path_expand(v),
        }
    }

    pub(crate) fn work_graph(&self) -> &WorkGraph {
        &self.graph
    }
}

/// Enumerate the property vertices a resource needs: every declared
/// property, object sub-properties, and sub-properties of existing
/// container items.
fn collect_property_vertices(
    resource: &weft_construct::Resource,
    property: &weft_kb::Property,
    changes: &mut Changes,
) {
    changes.add_node(Vertex::Property(PropertyVertex {
        ref_: PropertyRef::new(resource.id.clone(), property.path.clone()),
        template: Some(property.clone()),
        edge_rules: IndexMap::new(),
        resource_rules: IndexMap::new(),
    }));
    if property.properties.is_empty() {
        return;
    }
    if property.is_object() {
        for sub in property.properties.values() {
            collect_property_vertices(resource, sub, changes);
        }
        return;
    }
    // container of objects: enqueue sub-properties per existing item
    let Ok(path) = property.path.parse::<PropertyPath>() else {
        return;
    };
    let Ok(Some(value)) = resource.get_property(&path) else {
        return;
    };
    let items = match value {
        Value::List(items) => items.len(),
        Value::Set(set) => set.len(),
        _ => 0,
    };
    for i in 0..items {
        for sub in property.properties.values() {
            let mut indexed = sub.clone();
            indexed.path = format!("{}[{i}].{}", property.path, sub.name);
            collect_property_vertices(resource, &indexed, changes);
        }
    }
}
