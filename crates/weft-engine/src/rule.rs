//! Operational rule engine
//!
//! Executes templated rules against the current solution: `if` gates,
//! configuration writes, and operational steps that ensure N neighbours
//! exist in a direction, creating or reusing resources to get there.

use tracing::{debug, info};

use weft_construct::{
    PropertyPath, PropertyRef, Resource, ResourceId, SimpleEdge, Value,
};
use weft_kb::{
    layers, Configuration, ConfigurationRule, DependencyLayer, Direction, DynamicData,
    OperationalRule, OperationalStep, Property, ResourceSelector,
};

use crate::decisions::ConfigureAction;
use crate::error::{Error, Result};
use crate::reconciler;
use crate::solution::SolutionContext;

/// Evaluate a rule's `if` gate. Unresolved field reads mean "not yet":
/// the condition is simply false on this pass.
pub fn evaluate_if_condition(
    sol: &SolutionContext,
    condition: &str,
    data: &DynamicData,
) -> Result<bool> {
    Ok(sol.dyn_ctx().execute_condition(condition, data)?)
}

/// Full selector match against a live candidate: decoded id filter,
/// classification requirements, and the templated `can_use` predicate.
pub fn selector_is_match(
    sol: &SolutionContext,
    data: &DynamicData,
    selector: &ResourceSelector,
    candidate: &Resource,
) -> Result<bool> {
    if !selector.selector.is_empty() {
        let ctx = sol.dyn_ctx();
        let filter = match ctx.execute_id(&selector.selector, data) {
            Ok(id) => id,
            Err(e) if e.is_unresolved() => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if !filter.matches(&candidate.id) {
            return Ok(false);
        }
    }
    if !selector.classifications.is_empty() {
        match sol.kb().get_resource_template(&candidate.id) {
            Ok(t) => {
                if !t.contains_classifications(&selector.classifications) {
                    return Ok(false);
                }
            }
            Err(_) => return Ok(false),
        }
    }
    if !selector.can_use.is_empty() {
        let use_data = DynamicData {
            resource: data.resource.clone(),
            edge: Some(SimpleEdge::new(
                data.resource.clone(),
                candidate.id.clone(),
            )),
            path: data.path.clone(),
        };
        let ok = sol.dyn_ctx().execute_condition(&selector.can_use, &use_data)?;
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// The context one rule evaluation runs in: the owning property (when the
/// rule came from a property declaration), the template inputs, and any
/// identity rewrite the rule produced for the caller to apply.
#[derive(Debug, Default)]
pub struct RuleContext {
    pub property: Option<Property>,
    pub data: DynamicData,
    /// A namespace rewrite produced by `set_field`; the evaluator applies it
    /// once at the end of the owning vertex's evaluation.
    pub pending_id_update: Option<(ResourceId, ResourceId)>,
}

impl RuleContext {
    pub fn new(data: DynamicData) -> Self {
        Self {
            property: None,
            data,
            pending_id_update: None,
        }
    }

    pub fn with_property(property: Property, data: DynamicData) -> Self {
        Self {
            property: Some(property),
            data,
            pending_id_update: None,
        }
    }

    pub fn set_data(&mut self, data: DynamicData) {
        self.data = data;
    }

    fn record_id_update(&mut self, old: ResourceId, new: ResourceId) {
        if old == new {
            return;
        }
        self.pending_id_update = match self.pending_id_update.take() {
            // chain rewrites so the caller applies a single old→new jump
            Some((origin, prior)) if prior == old => Some((origin, new.clone())),
            Some(existing) => Some(existing),
            None => Some((old, new.clone())),
        };
        if let Some(edge) = &mut self.data.edge {
            if edge.source == self.data.resource {
                edge.source = new.clone();
            }
            if edge.target == self.data.resource {
                edge.target = new.clone();
            }
        }
        self.data.resource = new;
    }

    /// Run a rule attached to a property declaration.
    pub fn handle_property_rule(
        &mut self,
        sol: &mut SolutionContext,
        rule: &OperationalRule,
    ) -> Result<()> {
        self.handle_operational_rule(sol, rule)
    }

    /// Run a rule: gate, step, then configuration writes.
    pub fn handle_operational_rule(
        &mut self,
        sol: &mut SolutionContext,
        rule: &OperationalRule,
    ) -> Result<()> {
        if !evaluate_if_condition(sol, &rule.if_condition, &self.data)? {
            debug!(resource = %self.data.resource, "rule gated off by if-condition");
            return Ok(());
        }
        if let Some(step) = &rule.step {
            self.handle_operational_step(sol, step)?;
        }
        for config in &rule.configuration_rules {
            self.apply_configuration(sol, config)?;
        }
        Ok(())
    }

    /// Apply one configuration rule: decode the target resource and field,
    /// then write through `configure_resource`. Container-typed targets are
    /// appended to; everything else is set.
    pub fn apply_configuration(
        &mut self,
        sol: &mut SolutionContext,
        config: &ConfigurationRule,
    ) -> Result<()> {
        let (target, field) = decode_configuration_target(sol, config, &self.data)?;
        let action = match sol
            .kb()
            .get_resource_template(&target)
            .ok()
            .and_then(|t| t.property(&field))
        {
            Some(p) if p.is_container() && !p.is_object() => ConfigureAction::Add,
            _ => ConfigureAction::Set,
        };
        let data = DynamicData {
            resource: target.clone(),
            edge: self.data.edge.clone(),
            path: self.data.path.clone(),
        };
        sol.configure_resource(
            &target,
            &Configuration {
                field,
                value: config.config.value.clone(),
            },
            &data,
            action,
        )
    }

    /// The "ensure N neighbours in this direction" step.
    pub fn handle_operational_step(
        &mut self,
        sol: &mut SolutionContext,
        step: &OperationalStep,
    ) -> Result<()> {
        let required = step.required();
        let resource_id = self.data.resource.clone();
        let resource = sol.graph().require(&resource_id)?.clone();

        let property_path = self.property.as_ref().map(|p| p.path.clone());
        let ids = match property_path {
            Some(path) => self.dependencies_from_property(sol, step, &resource, &path)?,
            None => self.resources_for_step(sol, step, &resource_id)?,
        };

        if ids.len() >= required || resource.imported {
            return Ok(());
        }
        if step.fail_if_missing {
            return Err(Error::OperationalResourceMissing(resource_id));
        }

        let mut have: Vec<ResourceId> = ids;
        while have.len() < required {
            let chosen = match self.find_reusable(sol, step, &resource_id, &have)? {
                Some(existing) => existing,
                None => self.create_for_step(sol, step, &have)?,
            };
            self.add_dependency_for_direction(sol, step, &chosen)?;
            have.push(chosen);
        }
        Ok(())
    }

    /// Candidates already reachable in the step's direction, filtered
    /// through the selectors. Ids already held by the owning property are
    /// treated as satisfying and get their implied edges added.
    fn resources_for_step(
        &self,
        sol: &mut SolutionContext,
        step: &OperationalStep,
        resource: &ResourceId,
    ) -> Result<Vec<ResourceId>> {
        let candidates = match step.direction {
            Direction::Upstream => {
                layers::upstream(sol.graph(), sol.kb(), resource, DependencyLayer::FirstFunctional)
            }
            Direction::Downstream => {
                layers::downstream(sol.graph(), sol.kb(), resource, DependencyLayer::FirstFunctional)
            }
        };
        let mut matched = Vec::new();
        for candidate_id in candidates {
            let Some(candidate) = sol.graph().get(&candidate_id) else {
                continue;
            };
            let candidate = candidate.clone();
            for selector in &step.resources {
                if selector_is_match(sol, &self.data, selector, &candidate)? {
                    matched.push(candidate_id.clone());
                    break;
                }
            }
        }
        Ok(matched)
    }

    /// Ids the owning property already holds; their implied edges are added
    /// so graph connectivity matches the property contents.
    fn dependencies_from_property(
        &self,
        sol: &mut SolutionContext,
        step: &OperationalStep,
        resource: &Resource,
        property_path: &str,
    ) -> Result<Vec<ResourceId>> {
        let path: PropertyPath = property_path.parse().map_err(weft_construct::Error::from)?;
        let value = match resource.get_property(&path)? {
            Some(v) => v.clone(),
            None => return Ok(Vec::new()),
        };
        let mut ids = Vec::new();
        collect_ids(&value, &mut ids);
        for id in &ids {
            if !sol.graph().contains(id) {
                return Err(Error::Construct(weft_construct::Error::ResourceNotFound(
                    id.clone(),
                )));
            }
            let (src, tgt) = match step.direction {
                Direction::Upstream => (id.clone(), resource.id.clone()),
                Direction::Downstream => (resource.id.clone(), id.clone()),
            };
            if !sol.graph().has_edge(&src, &tgt) {
                sol.operational_view().add_edge(&src, &tgt)?;
            }
        }
        Ok(ids)
    }

    /// The lexicographically least existing resource matching a selector
    /// that is not already serving the step.
    fn find_reusable(
        &self,
        sol: &SolutionContext,
        step: &OperationalStep,
        owner: &ResourceId,
        have: &[ResourceId],
    ) -> Result<Option<ResourceId>> {
        let mut best: Option<ResourceId> = None;
        for candidate_id in sol.graph().resource_ids() {
            if &candidate_id == owner || have.contains(&candidate_id) {
                continue;
            }
            let Some(candidate) = sol.graph().get(&candidate_id) else {
                continue;
            };
            for selector in &step.resources {
                if selector_is_match(sol, &self.data, selector, candidate)? {
                    if best.as_ref().map(|b| candidate_id < *b).unwrap_or(true) {
                        best = Some(candidate_id.clone());
                    }
                    break;
                }
            }
        }
        Ok(best)
    }

    /// Instantiate a new resource for the step: type from the first
    /// selector with a decodable type, name derived from the owner and the
    /// owning property path, suffixed on collision.
    fn create_for_step(
        &self,
        sol: &mut SolutionContext,
        step: &OperationalStep,
        have: &[ResourceId],
    ) -> Result<ResourceId> {
        let owner = &self.data.resource;
        for selector in &step.resources {
            let type_id = if selector.selector.is_empty() {
                // classification-only selector: first template that carries
                // all required classifications
                sol.kb()
                    .list_resources()
                    .into_iter()
                    .find(|t| t.contains_classifications(&selector.classifications))
                    .map(|t| t.id())
            } else {
                let ctx = sol.dyn_ctx();
                match ctx.execute_id(&selector.selector, &self.data) {
                    Ok(id) => Some(id),
                    Err(e) if e.is_unresolved() => None,
                    Err(e) => return Err(e.into()),
                }
            };
            let Some(type_id) = type_id else { continue };

            let base = match &self.property {
                Some(p) => format!("{}-{}", owner.name, sanitize_path(&p.path)),
                None => format!("{}-{}", owner.name, type_id.r#type),
            };
            let mut name = base.clone();
            let mut suffix = 2;
            loop {
                let candidate = ResourceId::new(&type_id.provider, &type_id.r#type, &name);
                if !sol.graph().contains(&candidate) && !have.contains(&candidate) {
                    info!(resource = %candidate, owner = %owner, "creating operational resource");
                    sol.operational_view()
                        .add_resource(Resource::new(candidate.clone()))?;
                    return Ok(candidate);
                }
                name = format!("{base}-{suffix}");
                suffix += 1;
            }
        }
        Err(Error::OperationalResourceMissing(owner.clone()))
    }

    fn add_dependency_for_direction(
        &mut self,
        sol: &mut SolutionContext,
        step: &OperationalStep,
        dependent: &ResourceId,
    ) -> Result<()> {
        let resource = self.data.resource.clone();
        let (src, tgt) = match step.direction {
            Direction::Upstream => (dependent.clone(), resource.clone()),
            Direction::Downstream => (resource.clone(), dependent.clone()),
        };
        sol.operational_view().add_edge(&src, &tgt)?;
        self.set_field(sol, &resource, dependent, step)
    }

    /// Point the owning property at `field_resource` (or a property ref to
    /// it), displacing and reconciling a previously held resource, and
    /// recording the namespace rewrite when the property calls for it.
    pub fn set_field(
        &mut self,
        sol: &mut SolutionContext,
        resource_id: &ResourceId,
        field_resource: &ResourceId,
        step: &OperationalStep,
    ) -> Result<()> {
        let Some(property) = self.property.clone() else {
            return Ok(());
        };
        let path: PropertyPath = property.path.parse().map_err(weft_construct::Error::from)?;
        let resource = sol.graph().require(resource_id)?.clone();
        let current = resource.get_property(&path)?.cloned();

        let new_value = if step.use_property_ref.is_empty() {
            Value::Id(field_resource.clone())
        } else {
            Value::Ref(PropertyRef::new(
                field_resource.clone(),
                step.use_property_ref.clone(),
            ))
        };

        if resource.imported {
            if property.contains(current.as_ref(), &new_value) {
                self.namespace(sol, &property, resource_id, field_resource)?;
                return Ok(());
            }
            return Err(Error::ImportedResource {
                resource: resource_id.clone(),
                field: property.path.clone(),
            });
        }

        // displace a previously held single value pointing elsewhere
        let displaced = match &current {
            Some(Value::Id(old)) if old != field_resource => Some(old.clone()),
            Some(Value::Ref(old)) if &old.resource != field_resource => {
                Some(old.resource.clone())
            }
            Some(Value::List(items)) => {
                if items.iter().any(|v| v.as_id() == Some(field_resource)) {
                    return Ok(());
                }
                None
            }
            _ => None,
        };
        if let Some(old) = displaced {
            info!(resource = %resource_id, old = %old, new = %field_resource,
                "replacing field value");
            let (src, tgt) = match step.direction {
                Direction::Upstream => (old.clone(), resource_id.clone()),
                Direction::Downstream => (resource_id.clone(), old.clone()),
            };
            sol.operational_view().remove_edge(&src, &tgt);
            reconciler::remove_resource(sol, &old, false)?;
        }

        let res = sol.graph_mut().require_mut(resource_id)?;
        if property.is_container() && !property.is_object() {
            res.append_property(&path, new_value)?;
        } else {
            res.set_property(&path, new_value)?;
        }
        debug!(resource = %resource_id, field = %property.path, value = %field_resource,
            "set field");
        self.namespace(sol, &property, resource_id, field_resource)
    }

    /// When the owning property is marked `namespace`, rewrite the owning
    /// resource's namespace to the field resource's name.
    fn namespace(
        &mut self,
        sol: &SolutionContext,
        property: &Property,
        resource_id: &ResourceId,
        field_resource: &ResourceId,
    ) -> Result<()> {
        if !property.namespace {
            return Ok(());
        }
        let old = sol.graph().require(resource_id)?.id.clone();
        if old.namespace == field_resource.name {
            return Ok(());
        }
        let mut new = old.clone();
        new.namespace = field_resource.name.clone();
        self.record_id_update(old, new);
        Ok(())
    }

    /// Undo a step's ownership of the given property: remove the implied
    /// dependencies, drop orphaned glue, and clear the value.
    pub fn clear_property(
        &mut self,
        sol: &mut SolutionContext,
        step: &OperationalStep,
        resource_id: &ResourceId,
        property_path: &str,
    ) -> Result<()> {
        let path: PropertyPath = property_path.parse().map_err(weft_construct::Error::from)?;
        let value = {
            let resource = sol.graph().require(resource_id)?;
            match resource.get_property(&path)? {
                Some(v) => v.clone(),
                None => return Ok(()),
            }
        };
        let mut ids = Vec::new();
        collect_ids(&value, &mut ids);
        for id in ids {
            let (src, tgt) = match step.direction {
                Direction::Upstream => (id.clone(), resource_id.clone()),
                Direction::Downstream => (resource_id.clone(), id.clone()),
            };
            sol.operational_view().remove_edge(&src, &tgt);
            if sol.kb().get_functionality(&id) == weft_kb::Functionality::Unknown {
                reconciler::remove_resource(sol, &id, false)?;
            }
        }
        let resource = sol.graph_mut().require_mut(resource_id)?;
        resource.remove_property(&path, None)?;
        Ok(())
    }
}

fn collect_ids(value: &Value, out: &mut Vec<ResourceId>) {
    match value {
        Value::Id(id) => {
            if !id.is_zero() && !out.contains(id) {
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
                collect_ids(v, out);
            }
        }
        Value::Set(set) => {
            for v in set.iter() {
                collect_ids(v, out);
            }
        }
        _ => {}
    }
}

/// Decode a configuration rule's target `(resource, field)`. An empty
/// resource template means the rule targets the resource in scope.
pub fn decode_configuration_target(
    sol: &SolutionContext,
    config: &ConfigurationRule,
    data: &DynamicData,
) -> Result<(ResourceId, String)> {
    let ctx = sol.dyn_ctx();
    let target = if config.resource.is_empty() {
        data.resource.clone()
    } else {
        ctx.execute_id(&config.resource, data)?
    };
    let field = ctx.execute_string(&config.config.field, data)?;
    Ok((target, field))
}

fn sanitize_path(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            '.' | '[' | ']' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintList;
    use weft_kb::{KnowledgeBase, ResourceTemplate};

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn kb_compute_network() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        let mut compute = ResourceTemplate::new("compute:c");
        compute.classification.is = vec!["compute".into()];
        compute.properties.insert(
            "network".into(),
            Property {
                type_spec: "resource(net:n)".into(),
                operational_rule: Some(OperationalRule {
                    step: Some(OperationalStep {
                        direction: Direction::Upstream,
                        resources: vec![ResourceSelector {
                            selector: "net:n".into(),
                            ..Default::default()
                        }],
                        num_needed: 1,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        kb.add_resource_template(compute);
        kb.add_resource_template(ResourceTemplate::new("net:n"));
        kb
    }

    #[test]
    fn test_step_creates_upstream_resource_and_sets_field() {
        let mut sol = SolutionContext::new(kb_compute_network(), ConstraintList::default());
        sol.raw_view()
            .add_resource(Resource::new(id("compute:c:main")))
            .unwrap();

        let template = sol.kb().get_resource_template(&id("compute:c:main")).unwrap();
        let property = template.property("network").unwrap().clone();
        let rule = property.operational_rule.clone().unwrap();

        let mut ctx = RuleContext::with_property(
            property,
            DynamicData::for_resource(id("compute:c:main")),
        );
        ctx.handle_property_rule(&mut sol, &rule).unwrap();

        let created = id("net:n:main-network");
        assert!(sol.graph().contains(&created));
        assert!(sol.graph().has_edge(&created, &id("compute:c:main")));
        assert_eq!(
            sol.graph().get(&id("compute:c:main")).unwrap().properties["network"],
            Value::Id(created)
        );
    }

    #[test]
    fn test_step_reuses_existing_candidate() {
        let mut sol = SolutionContext::new(kb_compute_network(), ConstraintList::default());
        sol.raw_view()
            .add_resource(Resource::new(id("compute:c:main")))
            .unwrap();
        sol.raw_view()
            .add_resource(Resource::new(id("net:n:shared")))
            .unwrap();

        let template = sol.kb().get_resource_template(&id("compute:c:main")).unwrap();
        let property = template.property("network").unwrap().clone();
        let rule = property.operational_rule.clone().unwrap();

        let mut ctx = RuleContext::with_property(
            property,
            DynamicData::for_resource(id("compute:c:main")),
        );
        ctx.handle_property_rule(&mut sol, &rule).unwrap();

        // reused the existing net rather than creating main-network
        assert!(!sol.graph().contains(&id("net:n:main-network")));
        assert_eq!(
            sol.graph().get(&id("compute:c:main")).unwrap().properties["network"],
            Value::Id(id("net:n:shared"))
        );
    }

    #[test]
    fn test_fail_if_missing() {
        let mut kb = KnowledgeBase::new();
        kb.add_resource_template(ResourceTemplate::new("p:t"));
        let mut sol = SolutionContext::new(kb, ConstraintList::default());
        sol.raw_view()
            .add_resource(Resource::new(id("p:t:a")))
            .unwrap();

        let step = OperationalStep {
            direction: Direction::Downstream,
            resources: vec![ResourceSelector {
                selector: "p:missing".into(),
                ..Default::default()
            }],
            fail_if_missing: true,
            ..Default::default()
        };
        let mut ctx = RuleContext::new(DynamicData::for_resource(id("p:t:a")));
        assert!(matches!(
            ctx.handle_operational_step(&mut sol, &step),
            Err(Error::OperationalResourceMissing(_))
        ));
    }

    #[test]
    fn test_clear_property_removes_value_edge_and_glue() {
        let mut sol = SolutionContext::new(kb_compute_network(), ConstraintList::default());
        sol.raw_view()
            .add_resource(Resource::new(id("compute:c:main")))
            .unwrap();

        let template = sol.kb().get_resource_template(&id("compute:c:main")).unwrap();
        let property = template.property("network").unwrap().clone();
        let rule = property.operational_rule.clone().unwrap();
        let step = rule.step.clone().unwrap();

        let mut ctx = RuleContext::with_property(
            property,
            DynamicData::for_resource(id("compute:c:main")),
        );
        ctx.handle_property_rule(&mut sol, &rule).unwrap();
        let created = id("net:n:main-network");
        assert!(sol.graph().contains(&created));

        ctx.clear_property(&mut sol, &step, &id("compute:c:main"), "network")
            .unwrap();
        assert!(!sol.graph().contains(&created), "orphaned glue is swept");
        assert!(sol
            .graph()
            .get(&id("compute:c:main"))
            .unwrap()
            .properties
            .get("network")
            .is_none());
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("Subnets[0].Cidr"), "subnets-0--cidr");
        assert_eq!(sanitize_path("network"), "network");
    }
}
