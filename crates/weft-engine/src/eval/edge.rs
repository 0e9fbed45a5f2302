//! Edge vertex behavior
//!
//! An edge vertex runs the edge template's operational rules. Configuration
//! rules whose target property can already be named are handed off to that
//! property's vertex (so the write happens where the ordering is enforced);
//! whatever could not be distributed is applied here directly.

use indexmap::IndexMap;
use tracing::debug;

use weft_kb::{DynamicData, OperationalRule};

use crate::error::Result;
use crate::eval::key::Key;
use crate::eval::property::capture_rule;
use crate::eval::vertex::{Changes, EdgeVertex, PropertyVertex, Vertex};
use crate::eval::Evaluator;
use crate::rule::{decode_configuration_target, RuleContext};

impl Evaluator {
    pub(crate) fn edge_dependencies(&mut self, v: &EdgeVertex) -> Result<Changes> {
        let mut changes = Changes::new();
        let own = Key::Edge(v.edge.clone());
        let data = DynamicData::for_edge(v.edge.clone());

        {
            let ctx = self.sol.capture_ctx();
            for rule in &v.rules {
                capture_rule(&ctx, &data, rule);
            }
            for r in ctx.captured().refs {
                changes.add_edge(own.clone(), Key::Property(r));
            }
        }

        // distribute decodable configuration rules to their property vertex
        let mut newly_distributed = Vec::new();
        for (ri, rule) in v.rules.iter().enumerate() {
            for (ci, config) in rule.configuration_rules.iter().enumerate() {
                if v.distributed.contains(&(ri, ci)) {
                    continue;
                }
                let Ok((target, field)) =
                    decode_configuration_target(&self.sol, config, &data)
                else {
                    continue;
                };
                let Ok(template) = self.sol.kb().get_resource_template(&target) else {
                    continue;
                };
                let Some(property) = template.property(&field) else {
                    continue;
                };
                let target_ref = weft_construct::PropertyRef::new(target.clone(), field.clone());
                let target_key = Key::Property(target_ref.clone());
                if self.is_evaluated(&target_key) {
                    // cannot add rules to work that already happened; the
                    // edge vertex applies this config itself
                    continue;
                }
                let mut edge_rules = IndexMap::new();
                edge_rules.insert(
                    v.edge.clone(),
                    vec![OperationalRule {
                        if_condition: rule.if_condition.clone(),
                        configuration_rules: vec![config.clone()],
                        step: None,
                    }],
                );
                changes.add_node(Vertex::Property(PropertyVertex {
                    ref_: target_ref,
                    template: Some(property.clone()),
                    edge_rules,
                    resource_rules: IndexMap::new(),
                }));
                changes.add_edge(target_key, own.clone());
                newly_distributed.push((ri, ci));
            }
        }
        if !newly_distributed.is_empty() {
            debug!(edge = %v.edge, count = newly_distributed.len(),
                "distributed configuration rules to property vertices");
            if let Some(Vertex::Edge(stored)) = self.vertex_mut(&own) {
                stored.distributed.extend(newly_distributed);
            }
        }
        Ok(changes)
    }

    pub(crate) fn evaluate_edge(&mut self, v: EdgeVertex) -> Result<()> {
        let mut ctx = RuleContext::new(DynamicData::for_edge(v.edge.clone()));
        for (ri, rule) in v.rules.iter().enumerate() {
            let remaining: Vec<_> = rule
                .configuration_rules
                .iter()
                .enumerate()
                .filter(|(ci, _)| !v.distributed.contains(&(ri, *ci)))
                .map(|(_, c)| c.clone())
                .collect();
            let effective = OperationalRule {
                if_condition: rule.if_condition.clone(),
                configuration_rules: remaining,
                step: rule.step.clone(),
            };
            ctx.handle_operational_rule(&mut self.sol, &effective)?;
        }
        if let Some((old, new)) = ctx.pending_id_update.take() {
            self.update_id(&old, &new)?;
        }
        Ok(())
    }
}
