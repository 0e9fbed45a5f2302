//! Path-expand vertex behavior
//!
//! A path-expand vertex satisfies one classification of one logical edge.
//! Its dependencies are the property vertices behind the satisfaction's
//! property references; its evaluation runs the expansion, enqueues
//! sub-expansions, and wires up the chain's properties.

use tracing::info;

use weft_construct::{ResourceId, Value};

use crate::decisions::Decision;
use crate::error::{Error, Result};
use crate::eval::key::{Key, ReadyPriority};
use crate::eval::vertex::{Changes, PathExpandVertex};
use crate::eval::Evaluator;
use crate::expand;

impl Evaluator {
    pub(crate) fn path_expand_dependencies(&mut self, v: &PathExpandVertex) -> Result<Changes> {
        let mut changes = Changes::new();
        let own = v_key(v);
        for (resource, reference) in [
            (&v.edge.source, &v.satisfaction.source_property_reference),
            (&v.edge.target, &v.satisfaction.target_property_reference),
        ] {
            for key in self.deps_for_property_reference(resource, reference) {
                changes.add_edge(own.clone(), key);
            }
        }
        Ok(changes)
    }

    /// Walk a `prop#sub` reference chain, collecting the property vertices
    /// it reads. Unresolved links end the walk; later recalculations pick
    /// the rest up once the earlier properties settle.
    fn deps_for_property_reference(&self, resource: &ResourceId, reference: &str) -> Vec<Key> {
        let mut keys = Vec::new();
        if reference.is_empty() {
            return keys;
        }
        let ctx = self.sol.dyn_ctx();
        let mut current = vec![resource.clone()];
        for part in reference.split('#') {
            let mut next = Vec::new();
            for id in &current {
                keys.push(Key::Property(weft_construct::PropertyRef::new(
                    id.clone(),
                    part.to_string(),
                )));
                let Ok(value) = ctx.field_value(part, id) else {
                    continue;
                };
                collect_ids_from_value(&value, &mut next);
            }
            current = next;
        }
        keys
    }

    pub(crate) fn path_expand_ready(&self, v: &PathExpandVertex) -> ReadyPriority {
        if self.sol.graph().contains(&v.edge.source) && self.sol.graph().contains(&v.edge.target)
        {
            ReadyPriority::ReadyNow
        } else {
            ReadyPriority::NotReadyMax
        }
    }

    pub(crate) fn evaluate_path_expand(&mut self, v: PathExpandVertex) -> Result<()> {
        let to_expansion_err = |message: String| Error::Expansion {
            edge: v.edge.clone(),
            classification: v.satisfaction.classification.clone(),
            message,
        };
        let inputs = expand::determine_satisfaction_inputs(&self.sol, &v.satisfaction, &v.edge)
            .map_err(|e| to_expansion_err(e.to_string()))?;

        for input in inputs {
            let result = expand::expand_edge(&mut self.sol, &input)?;
            if v.satisfaction.classification.is_empty() {
                info!(edge = %input.dep, path = result.path.len(), "satisfied edge");
            } else {
                info!(edge = %input.dep, classification = %input.classification,
                    path = result.path.len(), "satisfied classification");
            }
            self.sol.record_decision(Decision::Expansion {
                edge: input.dep.clone(),
                classification: input.classification.clone(),
                chosen_path: result.path.clone(),
                error: None,
            });

            // materialised resources and edges become new work
            self.drain_events()?;

            expand::consume_expansion_properties(&mut self.sol, &input)?;

            let updates = expand::handle_result_properties(&mut self.sol, &result)?;
            for (old, new) in updates {
                self.update_id(&old, &new)?;
            }
        }
        Ok(())
    }
}

fn v_key(v: &PathExpandVertex) -> Key {
    Key::PathExpand {
        edge: v.edge.clone(),
        classification: v.satisfaction.classification.clone(),
    }
}

fn collect_ids_from_value(value: &Value, out: &mut Vec<ResourceId>) {
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
            for item in items {
                collect_ids_from_value(item, out);
            }
        }
        Value::Set(set) => {
            for item in set.iter() {
                collect_ids_from_value(item, out);
            }
        }
        _ => {}
    }
}
