//! Solution context
//!
//! The mutable state of a solve: the resource graph (shared by both views),
//! the constraint list, the decision log, and the pending operational
//! events the evaluator drains into new work.
//!
//! The raw view mutates without side effects. The operational view records
//! an event per mutation so the rule pipeline runs for affected resources
//! and edges at the next enqueue point.

use indexmap::IndexSet;
use tracing::{debug, info};

use weft_construct::{
    PropertyPath, Resource, ResourceGraph, ResourceId, SimpleEdge, Value,
};
use weft_kb::{Configuration, DynamicContext, DynamicData, KnowledgeBase};

use crate::constraints::ConstraintList;
use crate::decisions::{ConfigureAction, Decision, DecisionRecord};
use crate::error::{Error, Result};

/// A graph mutation made through the operational view, pending rule
/// dispatch by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum OpEvent {
    ResourceAdded(ResourceId),
    EdgeAdded(SimpleEdge),
    EdgeRemoved(SimpleEdge),
}

#[derive(Debug)]
pub struct SolutionContext {
    kb: KnowledgeBase,
    graph: ResourceGraph,
    constraints: ConstraintList,
    decisions: Vec<DecisionRecord>,
    tags: Vec<(String, String)>,
    events: Vec<OpEvent>,
    /// Edges a `must_not_exist` constraint forbids reintroducing.
    forbidden_edges: IndexSet<SimpleEdge>,
}

impl SolutionContext {
    pub fn new(kb: KnowledgeBase, constraints: ConstraintList) -> Self {
        Self {
            kb,
            graph: ResourceGraph::new(),
            constraints,
            decisions: Vec::new(),
            tags: Vec::new(),
            events: Vec::new(),
            forbidden_edges: IndexSet::new(),
        }
    }

    pub fn kb(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut ResourceGraph {
        &mut self.graph
    }

    pub fn constraints(&self) -> &ConstraintList {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut ConstraintList {
        &mut self.constraints
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    /// A dynamic-value context over the current graph.
    pub fn dyn_ctx(&self) -> DynamicContext<'_> {
        DynamicContext::new(&self.graph, &self.kb)
    }

    /// A capturing dynamic-value context (records field reads).
    pub fn capture_ctx(&self) -> DynamicContext<'_> {
        DynamicContext::capturing(&self.graph, &self.kb)
    }

    /// Push an attribution tag; log entries recorded while it is in scope
    /// carry it. Pair with [`SolutionContext::pop_tag`].
    pub fn with(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    pub fn pop_tag(&mut self) {
        self.tags.pop();
    }

    pub fn record_decision(&mut self, decision: Decision) {
        self.decisions.push(DecisionRecord {
            tags: self.tags.clone(),
            decision,
        });
    }

    pub fn raw_view(&mut self) -> RawView<'_> {
        RawView { sol: self }
    }

    pub fn operational_view(&mut self) -> OperationalView<'_> {
        OperationalView { sol: self }
    }

    /// Drain the operational events accumulated since the last call.
    pub fn take_events(&mut self) -> Vec<OpEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn forbid_edge(&mut self, edge: SimpleEdge) {
        self.forbidden_edges.insert(edge);
    }

    pub fn is_forbidden(&self, edge: &SimpleEdge) -> bool {
        self.forbidden_edges.contains(edge)
    }

    /// Rewrite a resource's id across the whole solution: graph node, id
    /// map, edges, and every property value referencing it.
    pub fn update_id(&mut self, old: &ResourceId, new: &ResourceId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        info!(old = %old, new = %new, "updating resource id");
        self.graph.update_id(old, new)?;
        for forbidden in std::mem::take(&mut self.forbidden_edges) {
            let mut edge = forbidden;
            if &edge.source == old {
                edge.source = new.clone();
            }
            if &edge.target == old {
                edge.target = new.clone();
            }
            self.forbidden_edges.insert(edge);
        }
        Ok(())
    }

    /// Central entry point for `{field, value}` changes. Transforms the
    /// value to the property's declared type, then dispatches to the
    /// property-path operation for `action`.
    ///
    /// A `set` on an imported resource is an error unless the existing
    /// value already contains the new value (idempotent writes are allowed).
    pub fn configure_resource(
        &mut self,
        id: &ResourceId,
        config: &Configuration,
        data: &DynamicData,
        action: ConfigureAction,
    ) -> Result<()> {
        let template = self.kb.get_resource_template(id)?;
        let property = template.require_property(&config.field)?.clone();
        let path: PropertyPath = config.field.parse().map_err(weft_construct::Error::from)?;

        let value = if action == ConfigureAction::Remove && config.value.is_null() {
            Value::Null
        } else {
            let ctx = self.dyn_ctx();
            property
                .property_type()?
                .parse_value(config.value.clone(), &ctx, data)?
        };

        let resource = self.graph.require(id)?;
        if resource.imported {
            let current = resource.get_property(&path)?;
            if property.contains(current, &value) {
                debug!(resource = %id, field = %config.field, "idempotent write on imported resource");
                return Ok(());
            }
            return Err(Error::ImportedResource {
                resource: id.clone(),
                field: config.field.clone(),
            });
        }

        let resource = self.graph.require_mut(id)?;
        match action {
            ConfigureAction::Set => resource.set_property(&path, value.clone())?,
            ConfigureAction::Add => resource.append_property(&path, value.clone())?,
            ConfigureAction::Remove => {
                let to_remove = if value.is_null() { None } else { Some(value.clone()) };
                resource.remove_property(&path, to_remove)?
            }
        }
        debug!(resource = %id, field = %config.field, %action, "configured resource");
        self.record_decision(Decision::Configuration {
            resource: id.clone(),
            field: config.field.clone(),
            action,
            value,
        });
        Ok(())
    }

    /// Final coercion pass: run every set property through its declared
    /// type so the output graph is uniformly typed.
    pub fn transform_all_values(&mut self) -> Vec<Error> {
        let mut errors = Vec::new();
        let Ok(order) = self.graph.topological_sort() else {
            return errors;
        };
        for id in order {
            let Ok(template) = self.kb.get_resource_template(&id) else {
                continue;
            };
            let template = template.clone();
            let mut writes: Vec<(PropertyPath, Value)> = Vec::new();
            {
                let Some(resource) = self.graph.get(&id) else {
                    continue;
                };
                let ctx = DynamicContext::new(&self.graph, &self.kb);
                let data = DynamicData::for_resource(id.clone());
                template.loop_properties(|prop| {
                    let Ok(path) = prop.path.parse::<PropertyPath>() else {
                        return true;
                    };
                    let Ok(Some(current)) = resource.get_property(&path) else {
                        return true;
                    };
                    match prop
                        .property_type()
                        .and_then(|t| t.parse_value(current.clone(), &ctx, &data))
                    {
                        Ok(parsed) => {
                            if &parsed != current {
                                writes.push((path, parsed));
                            }
                        }
                        Err(e) => errors.push(Error::Template(e)),
                    }
                    true
                });
            }
            for (path, value) in writes {
                if let Some(resource) = self.graph.get_mut(&id) {
                    if let Err(e) = resource.set_property(&path, value) {
                        errors.push(Error::Path(e));
                    }
                }
            }
        }
        errors
    }
}

/// Unfettered access to the shared graph; no side effects.
pub struct RawView<'a> {
    sol: &'a mut SolutionContext,
}

impl RawView<'_> {
    pub fn add_resource(&mut self, resource: Resource) -> Result<()> {
        Ok(self.sol.graph.add_resource(resource)?)
    }

    pub fn remove_resource(&mut self, id: &ResourceId) -> Option<Resource> {
        self.sol.graph.remove_resource(id)
    }

    pub fn add_edge(&mut self, source: &ResourceId, target: &ResourceId) -> Result<bool> {
        Ok(self.sol.graph.add_edge(source, target)?)
    }

    pub fn remove_edge(&mut self, source: &ResourceId, target: &ResourceId) -> bool {
        self.sol.graph.remove_edge(source, target)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.sol.graph.get(id)
    }

    pub fn get_mut(&mut self, id: &ResourceId) -> Option<&mut Resource> {
        self.sol.graph.get_mut(id)
    }
}

/// Graph access that additionally queues the operational-rule pipeline for
/// every mutation.
pub struct OperationalView<'a> {
    sol: &'a mut SolutionContext,
}

impl OperationalView<'_> {
    pub fn add_resource(&mut self, resource: Resource) -> Result<()> {
        let id = resource.id.clone();
        self.sol.graph.add_resource(resource)?;
        self.sol.events.push(OpEvent::ResourceAdded(id));
        Ok(())
    }

    pub fn add_edge(&mut self, source: &ResourceId, target: &ResourceId) -> Result<bool> {
        let edge = SimpleEdge::new(source.clone(), target.clone());
        if self.sol.is_forbidden(&edge) {
            return Err(Error::Constraint(format!(
                "edge {edge} is forbidden by a must_not_exist constraint"
            )));
        }
        let added = self.sol.graph.add_edge(source, target)?;
        if added {
            self.sol.events.push(OpEvent::EdgeAdded(edge));
        }
        Ok(added)
    }

    pub fn remove_edge(&mut self, source: &ResourceId, target: &ResourceId) -> bool {
        let removed = self.sol.graph.remove_edge(source, target);
        if removed {
            self.sol
                .events
                .push(OpEvent::EdgeRemoved(SimpleEdge::new(
                    source.clone(),
                    target.clone(),
                )));
        }
        removed
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.sol.graph.get(id)
    }
}
