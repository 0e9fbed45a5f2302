//! The knowledge base
//!
//! An in-memory, read-only index of resource templates (vertices) and edge
//! templates (edges) over qualified type names. Loaders populate it from
//! template documents; the engine only reads.

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use weft_construct::{Resource, ResourceId};

use crate::classification::{Classification, Functionality};
use crate::error::{Error, Result};
use crate::expr::{DynamicContext, DynamicData};
use crate::template::{
    ConsumptionDelay, EdgePathSatisfaction, EdgeTemplate, ResourceTemplate, SatisfactionRoute,
};

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    templates: IndexMap<String, ResourceTemplate>,
    edges: IndexMap<(String, String), EdgeTemplate>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource_template(&mut self, mut template: ResourceTemplate) {
        template.normalize();
        debug!(template = %template.qualified_type_name, "adding resource template");
        self.templates
            .insert(template.qualified_type_name.clone(), template);
    }

    pub fn add_edge_template(&mut self, template: EdgeTemplate) {
        let key = (
            template.source.qualified_type_name(),
            template.target.qualified_type_name(),
        );
        debug!(source = %key.0, target = %key.1, "adding edge template");
        self.edges.insert(key, template);
    }

    /// All templates, sorted by qualified type name.
    pub fn list_resources(&self) -> Vec<&ResourceTemplate> {
        let mut names: Vec<&String> = self.templates.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|n| &self.templates[n.as_str()])
            .collect()
    }

    pub fn get_template_by_type(&self, qualified_type_name: &str) -> Option<&ResourceTemplate> {
        self.templates.get(qualified_type_name)
    }

    pub fn get_resource_template(&self, id: &ResourceId) -> Result<&ResourceTemplate> {
        self.templates
            .get(&id.qualified_type_name())
            .ok_or_else(|| Error::TemplateNotFound(id.qualified_type_name()))
    }

    pub fn get_edge_template(&self, from: &ResourceId, to: &ResourceId) -> Option<&EdgeTemplate> {
        self.edges
            .get(&(from.qualified_type_name(), to.qualified_type_name()))
    }

    pub fn has_direct_path(&self, from: &ResourceId, to: &ResourceId) -> bool {
        self.get_edge_template(from, to).is_some()
    }

    /// All edge templates with their (source, target) qualified type keys.
    pub fn edge_templates(&self) -> impl Iterator<Item = (&(String, String), &EdgeTemplate)> {
        self.edges.iter()
    }

    /// Successor qualified types of a type in the template graph, in
    /// insertion order.
    pub fn successor_types(&self, qualified_type_name: &str) -> Vec<&EdgeTemplate> {
        self.edges
            .iter()
            .filter(|((src, _), _)| src == qualified_type_name)
            .map(|(_, t)| t)
            .collect()
    }

    /// Does a path exist from `from` to `to` walking only through glue
    /// (functionality `Unknown`) intermediates?
    pub fn has_functional_path(&self, from: &ResourceId, to: &ResourceId) -> bool {
        let target = to.qualified_type_name();
        let start = from.qualified_type_name();
        let mut stack = vec![start.clone()];
        let mut visited: IndexSet<String> = IndexSet::new();
        visited.insert(start);
        while let Some(current) = stack.pop() {
            for edge in self.successor_types(&current) {
                let next = edge.target.qualified_type_name();
                if next == target {
                    return true;
                }
                if visited.contains(&next) {
                    continue;
                }
                let functionality = self
                    .get_template_by_type(&next)
                    .map(|t| t.functionality())
                    .unwrap_or_default();
                if functionality != Functionality::Unknown {
                    continue;
                }
                visited.insert(next.clone());
                stack.push(next);
            }
        }
        false
    }

    /// All simple paths between two types in the template graph.
    pub fn all_paths(&self, from: &ResourceId, to: &ResourceId) -> Vec<Vec<&ResourceTemplate>> {
        let mut results = Vec::new();
        let start = from.qualified_type_name();
        let target = to.qualified_type_name();
        if self.get_template_by_type(&start).is_none() {
            return results;
        }
        let mut path = vec![start];
        self.all_paths_inner(&target, &mut path, &mut results);
        results
    }

    fn all_paths_inner<'kb>(
        &'kb self,
        target: &str,
        path: &mut Vec<String>,
        results: &mut Vec<Vec<&'kb ResourceTemplate>>,
    ) {
        let current = path.last().cloned().expect("path is never empty");
        if current == target {
            results.push(
                path.iter()
                    .filter_map(|n| self.get_template_by_type(n))
                    .collect(),
            );
            return;
        }
        for edge in self.successor_types(&current) {
            let next = edge.target.qualified_type_name();
            if path.contains(&next) {
                continue;
            }
            path.push(next);
            self.all_paths_inner(target, path, results);
            path.pop();
        }
    }

    pub fn get_functionality(&self, id: &ResourceId) -> Functionality {
        self.get_template_by_type(&id.qualified_type_name())
            .map(|t| t.functionality())
            .unwrap_or_default()
    }

    pub fn get_classification(&self, id: &ResourceId) -> Classification {
        self.get_template_by_type(&id.qualified_type_name())
            .map(|t| t.classification.clone())
            .unwrap_or_default()
    }

    /// The satisfactions a concrete edge must honour: the union of the
    /// source template's `as_source` routes and the target template's
    /// `as_target` routes, matched up by classification. An edge whose
    /// templates declare nothing yields a single unclassified satisfaction.
    pub fn get_path_satisfactions_from_edge(
        &self,
        source: &ResourceId,
        target: &ResourceId,
    ) -> Vec<EdgePathSatisfaction> {
        let src_routes = self
            .get_template_by_type(&source.qualified_type_name())
            .map(|t| t.path_satisfaction.as_source.clone())
            .unwrap_or_default();
        let tgt_routes = self
            .get_template_by_type(&target.qualified_type_name())
            .map(|t| t.path_satisfaction.as_target.clone())
            .unwrap_or_default();

        let mut classifications: Vec<String> = Vec::new();
        for route in src_routes.iter().chain(tgt_routes.iter()) {
            if !classifications.contains(&route.classification) {
                classifications.push(route.classification.clone());
            }
        }
        if classifications.is_empty() {
            return vec![EdgePathSatisfaction::default()];
        }

        let find = |routes: &[SatisfactionRoute], c: &str| -> String {
            routes
                .iter()
                .find(|r| r.classification == c)
                .map(|r| r.property_reference.clone())
                .unwrap_or_default()
        };
        classifications
            .into_iter()
            .map(|c| EdgePathSatisfaction {
                source_property_reference: find(&src_routes, &c),
                target_property_reference: find(&tgt_routes, &c),
                classification: c,
            })
            .collect()
    }

    /// The qualified types a namespaced property of `id`'s template may
    /// point at: explicit selector ids whose templates carry the required
    /// classifications, or (with no selector) every template that does.
    pub fn get_allowed_namespaced_resource_ids(
        &self,
        ctx: &DynamicContext<'_>,
        id: &ResourceId,
    ) -> Result<Vec<ResourceId>> {
        let template = self.get_resource_template(id)?;
        let mut result = Vec::new();
        let Some(property) = template.namespaced_property() else {
            return Ok(result);
        };
        let Some(rule) = &property.operational_rule else {
            return Ok(result);
        };
        let Some(step) = &rule.step else {
            return Ok(result);
        };
        for selector in &step.resources {
            if !selector.selector.is_empty() {
                let data = DynamicData::for_resource(id.clone());
                let sel_id = ctx.execute_id(&selector.selector, &data)?;
                if let Ok(t) = self.get_resource_template(&sel_id) {
                    if t.contains_classifications(&selector.classifications) {
                        result.push(sel_id);
                    }
                }
            } else if !selector.classifications.is_empty() {
                for t in self.list_resources() {
                    if t.contains_classifications(&selector.classifications) {
                        result.push(t.id());
                    }
                }
            }
        }
        Ok(result)
    }

    /// The resource a namespaced property currently points at, if any.
    pub fn get_namespace_resource(&self, resource: &Resource) -> Option<ResourceId> {
        let template = self.get_resource_template(&resource.id).ok()?;
        let property = template.namespaced_property()?;
        let path = property.path.parse().ok()?;
        match resource.get_property(&path).ok()?? {
            weft_construct::Value::Id(id) => Some(id.clone()),
            weft_construct::Value::Ref(r) => Some(r.resource.clone()),
            _ => None,
        }
    }

    pub fn get_property_type(&self, resource: &ResourceId, property: &str) -> Option<String> {
        self.get_template_by_type(&resource.qualified_type_name())
            .and_then(|t| t.property(property))
            .map(|p| p.type_spec.clone())
    }

    /// Resolve the consumed/emitted declarations between the two endpoints
    /// of an expansion. The returned delays are applied by the caller as
    /// synthesized add-constraints.
    pub fn consume_from_resource(
        &self,
        ctx: &DynamicContext<'_>,
        source: &Resource,
        target: &Resource,
    ) -> Result<Vec<ConsumptionDelay>> {
        let mut delays = Vec::new();
        for (consumer, producer) in [(source, target), (target, source)] {
            let Ok(consumer_template) = self.get_resource_template(&consumer.id) else {
                continue;
            };
            let Ok(producer_template) = self.get_resource_template(&producer.id) else {
                continue;
            };
            for declaration in &consumer_template.consumption.consumed {
                let Some(emission) = producer_template
                    .consumption
                    .emitted
                    .iter()
                    .find(|e| e.name == declaration.name)
                else {
                    continue;
                };
                let data = DynamicData::for_resource(producer.id.clone());
                let value = match ctx.execute_value(&emission.value, &data) {
                    Ok(v) => v,
                    // The producing field has not resolved yet: fall back to
                    // a property ref so the write happens when it does.
                    Err(e) if e.is_unresolved() => match e {
                        Error::UnresolvedField(r) => weft_construct::Value::Ref(r),
                        _ => unreachable!(),
                    },
                    Err(e) => return Err(e),
                };
                delays.push(ConsumptionDelay {
                    resource: consumer.id.clone(),
                    property_path: declaration.property_path.clone(),
                    value,
                });
            }
        }
        Ok(delays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::PathSatisfaction;

    fn edge(src: &str, tgt: &str) -> EdgeTemplate {
        EdgeTemplate {
            source: src.parse().unwrap(),
            target: tgt.parse().unwrap(),
            ..Default::default()
        }
    }

    fn kb_chain() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        let mut api = ResourceTemplate::new("p:api");
        api.classification.is = vec!["api".into()];
        kb.add_resource_template(api);
        kb.add_resource_template(ResourceTemplate::new("p:integration"));
        let mut lambda = ResourceTemplate::new("p:lambda");
        lambda.classification.is = vec!["compute".into()];
        kb.add_resource_template(lambda);
        kb.add_edge_template(edge("p:api", "p:integration"));
        kb.add_edge_template(edge("p:integration", "p:lambda"));
        kb
    }

    #[test]
    fn test_has_functional_path_through_glue() {
        let kb = kb_chain();
        assert!(kb.has_functional_path(
            &"p:api:x".parse().unwrap(),
            &"p:lambda:y".parse().unwrap()
        ));
        assert!(!kb.has_functional_path(
            &"p:lambda:y".parse().unwrap(),
            &"p:api:x".parse().unwrap()
        ));
    }

    #[test]
    fn test_all_paths() {
        let kb = kb_chain();
        let paths = kb.all_paths(&"p:api:x".parse().unwrap(), &"p:lambda:y".parse().unwrap());
        assert_eq!(paths.len(), 1);
        let names: Vec<&str> = paths[0]
            .iter()
            .map(|t| t.qualified_type_name.as_str())
            .collect();
        assert_eq!(names, vec!["p:api", "p:integration", "p:lambda"]);
    }

    #[test]
    fn test_path_satisfactions_default() {
        let kb = kb_chain();
        let sats = kb.get_path_satisfactions_from_edge(
            &"p:api:x".parse().unwrap(),
            &"p:lambda:y".parse().unwrap(),
        );
        assert_eq!(sats.len(), 1);
        assert!(sats[0].classification.is_empty());
    }

    #[test]
    fn test_allowed_namespaced_resource_ids() {
        use crate::property::Property;
        use crate::rule::{OperationalRule, OperationalStep, ResourceSelector};

        let mut kb = KnowledgeBase::new();
        let mut child = ResourceTemplate::new("k:child");
        child.properties.insert(
            "parent".into(),
            Property {
                type_spec: "resource(k:parent)".into(),
                namespace: true,
                operational_rule: Some(OperationalRule {
                    step: Some(OperationalStep {
                        resources: vec![ResourceSelector {
                            selector: "k:parent".into(),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        kb.add_resource_template(child);
        kb.add_resource_template(ResourceTemplate::new("k:parent"));

        let graph = weft_construct::ResourceGraph::new();
        let ctx = DynamicContext::new(&graph, &kb);
        let allowed = kb
            .get_allowed_namespaced_resource_ids(&ctx, &"k:child:c".parse().unwrap())
            .unwrap();
        assert_eq!(allowed, vec!["k:parent".parse().unwrap()]);
    }

    #[test]
    fn test_consume_from_resource_unresolved_becomes_ref() {
        use crate::template::{ConsumeDeclaration, Emission};
        use weft_construct::{Resource, Value};

        let mut kb = KnowledgeBase::new();
        let mut producer = ResourceTemplate::new("p:db");
        producer.consumption.emitted = vec![Emission {
            name: "endpoint".into(),
            value: r#"{{ field_value "Address" .Self }}"#.into(),
        }];
        kb.add_resource_template(producer);
        let mut consumer = ResourceTemplate::new("p:app");
        consumer.consumption.consumed = vec![ConsumeDeclaration {
            name: "endpoint".into(),
            property_path: "DbUrl".into(),
        }];
        kb.add_resource_template(consumer);

        let mut graph = weft_construct::ResourceGraph::new();
        graph.add_resource(Resource::new("p:app:a".parse().unwrap())).unwrap();
        graph.add_resource(Resource::new("p:db:d".parse().unwrap())).unwrap();

        let ctx = DynamicContext::new(&graph, &kb);
        let source = graph.get(&"p:app:a".parse().unwrap()).unwrap();
        let target = graph.get(&"p:db:d".parse().unwrap()).unwrap();
        let delays = kb.consume_from_resource(&ctx, source, target).unwrap();

        // the producer's Address has not resolved, so the delay carries a ref
        assert_eq!(delays.len(), 1);
        assert_eq!(delays[0].resource, "p:app:a".parse().unwrap());
        assert_eq!(delays[0].property_path, "DbUrl");
        assert!(matches!(&delays[0].value, Value::Ref(r) if r.property == "Address"));
    }

    #[test]
    fn test_path_satisfactions_union() {
        let mut kb = KnowledgeBase::new();
        let mut src = ResourceTemplate::new("p:src");
        src.path_satisfaction = PathSatisfaction {
            as_source: vec![SatisfactionRoute {
                classification: "network".into(),
                property_reference: "Subnet".into(),
            }],
            as_target: vec![],
        };
        let mut tgt = ResourceTemplate::new("p:tgt");
        tgt.path_satisfaction = PathSatisfaction {
            as_source: vec![],
            as_target: vec![SatisfactionRoute {
                classification: "permissions".into(),
                property_reference: String::new(),
            }],
        };
        kb.add_resource_template(src);
        kb.add_resource_template(tgt);

        let sats = kb.get_path_satisfactions_from_edge(
            &"p:src:a".parse().unwrap(),
            &"p:tgt:b".parse().unwrap(),
        );
        assert_eq!(sats.len(), 2);
        assert_eq!(sats[0].classification, "network");
        assert_eq!(sats[0].source_property_reference, "Subnet");
        assert_eq!(sats[1].classification, "permissions");
    }
}
