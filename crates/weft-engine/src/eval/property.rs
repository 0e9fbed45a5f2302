//! Property vertex behavior
//!
//! A property vertex evaluates one property of one resource: constraints
//! first (equals wins, then adds), then the template default, then the
//! property's own operational rule, then every edge-rule bucket. List, set,
//! and map properties re-enqueue their resource afterwards so newly
//! required sub-properties get scheduled.

use tracing::debug;

use weft_construct::{PropertyPath, Value};
use weft_kb::{DynamicContext, DynamicData, OperationalRule};

use crate::constraints::{ConstraintOperator, ResourceConstraint};
use crate::decisions::{ConfigureAction, Decision};
use crate::error::{Error, Result};
use crate::eval::key::{Key, ReadyPriority};
use crate::eval::vertex::{Changes, PropertyVertex};
use crate::eval::Evaluator;
use crate::rule::RuleContext;

/// Execute a rule's templates against a capturing context, purely to record
/// the fields it reads. Results and errors are discarded.
pub(crate) fn capture_rule(ctx: &DynamicContext<'_>, data: &DynamicData, rule: &OperationalRule) {
    let _ = ctx.execute_condition(&rule.if_condition, data);
    for config in &rule.configuration_rules {
        let _ = ctx.execute_value(&config.resource, data);
        let _ = ctx.execute_value(&config.config.field, data);
        if let Value::Str(s) = &config.config.value {
            if s.contains("{{") {
                let _ = ctx.execute_value(s, data);
            }
        }
    }
    if let Some(step) = &rule.step {
        for selector in &step.resources {
            if !selector.selector.is_empty() {
                let _ = ctx.execute_value(&selector.selector, data);
            }
            if !selector.can_use.is_empty() {
                let _ = ctx.execute_value(&selector.can_use, data);
            }
        }
    }
}

impl Evaluator {
    pub(crate) fn property_dependencies(&mut self, v: &PropertyVertex) -> Result<Changes> {
        let mut changes = Changes::new();
        if !self.sol.graph().contains(&v.ref_.resource) {
            return Ok(changes);
        }
        let ctx = self.sol.capture_ctx();
        let data = DynamicData::for_resource(v.ref_.resource.clone());

        if let Some(template) = &v.template {
            if let Some(Value::Str(s)) = &template.default_value {
                if s.contains("{{") {
                    let _ = ctx.execute_value(s, &data);
                }
            }
            if let Some(rule) = &template.operational_rule {
                capture_rule(&ctx, &data, rule);
            }
        }
        for (edge, rules) in &v.edge_rules {
            let edge_data = DynamicData::for_edge(edge.clone());
            for rule in rules {
                capture_rule(&ctx, &edge_data, rule);
            }
        }
        for rules in v.resource_rules.values() {
            for rule in rules {
                capture_rule(&ctx, &data, rule);
            }
        }

        let captured = ctx.captured();
        let own = Key::Property(v.ref_.clone());
        for r in captured.refs {
            if r == v.ref_ {
                continue;
            }
            changes.add_edge(own.clone(), Key::Property(r));
        }
        Ok(changes)
    }

    pub(crate) fn property_ready(&self, v: &PropertyVertex) -> ReadyPriority {
        let Some(template) = &v.template else {
            // wait until some edge or resource supplies a template
            return ReadyPriority::NotReadyMax;
        };
        if template.operational_rule.is_some() {
            // operational rules run as soon as possible so the resources
            // they create exist for everyone else
            return ReadyPriority::ReadyNow;
        }
        let spec = template.type_spec.as_str();
        if spec.starts_with("list") || spec.starts_with("set") {
            // append-only: every contributing edge must run first
            return ReadyPriority::NotReadyHigh;
        }
        if spec.starts_with("map") && template.properties.is_empty() {
            return ReadyPriority::NotReadyHigh;
        }
        if !self.sol.graph().contains(&v.ref_.resource) {
            return ReadyPriority::NotReadyHigh;
        }
        let ctx = self.sol.dyn_ctx();
        let data = DynamicData::for_resource(v.ref_.resource.clone());
        match template.default_value(&ctx, &data) {
            Ok(Some(_)) => ReadyPriority::ReadyNow,
            Ok(None) => {
                if v.edge_rules.is_empty() {
                    ReadyPriority::NotReadyMid
                } else {
                    ReadyPriority::ReadyNow
                }
            }
            Err(_) => ReadyPriority::NotReadyMid,
        }
    }

    pub(crate) fn evaluate_property(&mut self, v: PropertyVertex) -> Result<()> {
        self.sol.with("resource", v.ref_.resource.clone());
        self.sol.with("property", v.ref_.property.clone());
        let result = self.evaluate_property_inner(&v);
        self.sol.pop_tag();
        self.sol.pop_tag();
        result
    }

    fn evaluate_property_inner(&mut self, v: &PropertyVertex) -> Result<()> {
        if !self.sol.graph().contains(&v.ref_.resource) {
            debug!(key = %v.ref_, "resource gone, skipping property vertex");
            return Ok(());
        }
        let path: PropertyPath = v
            .ref_
            .property
            .parse()
            .map_err(weft_construct::Error::from)?;
        let data =
            DynamicData::for_resource(v.ref_.resource.clone()).with_path(&path);

        self.apply_property_constraints(v, &path, &data)?;

        let mut ctx = match &v.template {
            Some(template) => RuleContext::with_property(template.clone(), data.clone()),
            None => RuleContext::new(data.clone()),
        };

        // the property's own operational rule may create dependencies
        if let Some(rule) = v.template.as_ref().and_then(|t| t.operational_rule.clone()) {
            ctx.handle_property_rule(&mut self.sol, &rule)?;
        }

        // edge-rule buckets, tracking any id rewrite the rules produce
        let original = v.ref_.resource.clone();
        for (edge, rules) in &v.edge_rules {
            let current = ctx.data.resource.clone();
            let mut edge = edge.clone();
            if edge.source == original {
                edge.source = current.clone();
            }
            if edge.target == original {
                edge.target = current.clone();
            }
            for rule in rules {
                ctx.set_data(DynamicData {
                    resource: current.clone(),
                    edge: Some(edge.clone()),
                    path: Some(v.ref_.property.clone()),
                });
                ctx.handle_operational_rule(&mut self.sol, rule)?;
            }
        }
        for rules in v.resource_rules.values() {
            for rule in rules {
                ctx.set_data(
                    DynamicData::for_resource(ctx.data.resource.clone()).with_path(&path),
                );
                ctx.handle_operational_rule(&mut self.sol, rule)?;
            }
        }

        let pending = ctx.pending_id_update.take();
        let mut current_id = original.clone();
        if let Some((old, new)) = pending {
            current_id = new.clone();
            self.update_id(&old, &new)?;
        }
        let current_ref = weft_construct::PropertyRef::new(
            current_id.clone(),
            v.ref_.property.clone(),
        );

        let Some(template) = &v.template else {
            return Ok(());
        };
        let spec = template.type_spec.as_str();
        if spec.starts_with("list") || spec.starts_with("set") || spec.starts_with("map") {
            // shape may have changed: drop stale sub-vertices and re-enqueue
            // the resource so new sub-properties schedule
            self.cleanup_property_sub_vertices(&current_ref)?;
            return self.add_resources(&[current_id]);
        }

        // validate the final value and record the decision either way
        let value = {
            let Some(resource) = self.sol.graph().get(&current_id) else {
                return Ok(());
            };
            resource.get_property(&path)?.cloned().unwrap_or_default()
        };
        let ctx = self.sol.dyn_ctx();
        let validation = template.validate_value(
            &ctx,
            &DynamicData::for_resource(current_id.clone()).with_path(&path),
            &value,
        );
        drop(ctx);
        self.sol.record_decision(Decision::PropertyValidation {
            resource: current_id,
            property: v.ref_.property.clone(),
            value,
            error: validation.err(),
        });
        Ok(())
    }

    /// Apply resource-scoped constraints for this property: an `equals`
    /// overrides everything (including the default); `add`s append after.
    fn apply_property_constraints(
        &mut self,
        v: &PropertyVertex,
        path: &PropertyPath,
        data: &DynamicData,
    ) -> Result<()> {
        let matching: Vec<ResourceConstraint> = self
            .sol
            .constraints()
            .resource
            .iter()
            .filter(|c| c.target == v.ref_.resource && c.property == v.ref_.property)
            .cloned()
            .collect();
        let equals = matching
            .iter()
            .find(|c| c.operator == ConstraintOperator::Equals)
            .cloned();

        let (current, imported) = {
            let resource = self.sol.graph().require(&v.ref_.resource)?;
            (resource.get_property(path)?.cloned(), resource.imported)
        };

        if let Some(constraint) = &equals {
            self.apply_constraint_configuration(constraint, ConfigureAction::Set, data)?;
        } else if current.is_none() && !imported {
            if let Some(template) = &v.template {
                let default = {
                    let ctx = self.sol.dyn_ctx();
                    template.default_value(&ctx, data)?
                };
                if let Some(default) = default {
                    self.sol.configure_resource(
                        &v.ref_.resource,
                        &weft_kb::Configuration {
                            field: v.ref_.property.clone(),
                            value: default,
                        },
                        data,
                        ConfigureAction::Set,
                    )?;
                }
            }
        }

        for constraint in matching {
            if constraint.operator != ConstraintOperator::Add {
                continue;
            }
            self.apply_constraint_configuration(&constraint, ConfigureAction::Add, data)?;
        }
        Ok(())
    }

    /// Constraint writes that fail (e.g. against an imported resource) are
    /// recorded as rejected constraint decisions, surfaced at end of solve.
    fn apply_constraint_configuration(
        &mut self,
        constraint: &ResourceConstraint,
        action: ConfigureAction,
        data: &DynamicData,
    ) -> Result<()> {
        let outcome = self.sol.configure_resource(
            &constraint.target,
            &weft_kb::Configuration {
                field: constraint.property.clone(),
                value: constraint.value.clone(),
            },
            data,
            action,
        );
        match outcome {
            Ok(()) => {
                self.sol.record_decision(Decision::Constraint {
                    constraint: crate::constraints::Constraint::Resource(constraint.clone()),
                    applied: true,
                    error: None,
                });
                Ok(())
            }
            Err(e @ Error::ImportedResource { .. }) => {
                self.sol.record_decision(Decision::Constraint {
                    constraint: crate::constraints::Constraint::Resource(constraint.clone()),
                    applied: false,
                    error: Some(e.to_string()),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
