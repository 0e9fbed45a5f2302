//! Resource and edge templates
//!
//! Templates are the declarative documents the knowledge base is loaded
//! from: what properties a resource type exposes, how it is classified,
//! which rules fire to keep it operational, and how edges between types
//! are realised.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use weft_construct::{ResourceId, Value};

use crate::classification::{Classification, Functionality};
use crate::error::{Error, Result};
use crate::property::Property;
use crate::rule::OperationalRule;

/// How one endpoint of an edge satisfies a classification: optionally via a
/// property reference (`network#subnet` walks the `network` property, then
/// that resource's `subnet` property) instead of the resource itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionRoute {
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub property_reference: String,
}

/// The classification routes a resource template participates in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSatisfaction {
    #[serde(default)]
    pub as_source: Vec<SatisfactionRoute>,
    #[serde(default)]
    pub as_target: Vec<SatisfactionRoute>,
}

/// A fully-determined satisfaction for a concrete edge: the classification
/// plus the route on each endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgePathSatisfaction {
    pub classification: String,
    pub source_property_reference: String,
    pub target_property_reference: String,
}

/// A named value one endpoint of an expansion emits for the other to read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    pub name: String,
    /// Templated value, evaluated against the emitting resource.
    pub value: String,
}

/// A declaration that this template reads a named emission into one of its
/// properties when it becomes an expansion endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumeDeclaration {
    pub name: String,
    pub property_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Consumption {
    #[serde(default)]
    pub consumed: Vec<ConsumeDeclaration>,
    #[serde(default)]
    pub emitted: Vec<Emission>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    pub qualified_type_name: String,
    #[serde(default)]
    pub properties: IndexMap<String, Property>,
    #[serde(default)]
    pub classification: Classification,
    #[serde(default)]
    pub path_satisfaction: PathSatisfaction,
    #[serde(default)]
    pub consumption: Consumption,
    /// Resource-level rules, evaluated once per resource of this type.
    #[serde(default)]
    pub operational_rules: Vec<OperationalRule>,
}

impl ResourceTemplate {
    pub fn new(qualified_type_name: &str) -> Self {
        Self {
            qualified_type_name: qualified_type_name.to_string(),
            ..Default::default()
        }
    }

    /// The type filter this template instantiates (name and namespace empty).
    pub fn id(&self) -> ResourceId {
        let (provider, r#type) = self
            .qualified_type_name
            .split_once(':')
            .unwrap_or((self.qualified_type_name.as_str(), ""));
        ResourceId {
            provider: provider.to_string(),
            r#type: r#type.to_string(),
            namespace: String::new(),
            name: String::new(),
        }
    }

    pub fn functionality(&self) -> Functionality {
        self.classification.functionality()
    }

    /// Fill in each property's `name` and `path` from its position in the
    /// template. Loaders call this once after deserialization.
    pub fn normalize(&mut self) {
        fn walk(props: &mut IndexMap<String, Property>, prefix: &str) {
            for (name, prop) in props.iter_mut() {
                prop.name = name.clone();
                prop.path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                let path = prop.path.clone();
                walk(&mut prop.properties, &path);
            }
        }
        walk(&mut self.properties, "");
    }

    /// Look up a property by dotted path, descending into sub-properties.
    /// Index segments (`[0]`) are transparent: they resolve to the item
    /// declaration of the container they index into.
    pub fn property(&self, path: &str) -> Option<&Property> {
        let mut props = &self.properties;
        let mut current: Option<&Property> = None;
        for part in path.split('.') {
            let name = part.split('[').next().unwrap_or(part);
            if name.is_empty() {
                continue;
            }
            current = props.get(name);
            match current {
                Some(p) => props = &p.properties,
                None => return None,
            }
        }
        current
    }

    pub fn require_property(&self, path: &str) -> Result<&Property> {
        self.property(path).ok_or_else(|| Error::PropertyNotFound {
            template: self.qualified_type_name.clone(),
            property: path.to_string(),
        })
    }

    /// Visit every property declaration depth-first in template order.
    /// Returning false from the visitor stops the loop.
    pub fn loop_properties<F>(&self, mut visit: F)
    where
        F: FnMut(&Property) -> bool,
    {
        fn walk<F: FnMut(&Property) -> bool>(
            props: &IndexMap<String, Property>,
            visit: &mut F,
        ) -> bool {
            for prop in props.values() {
                if !visit(prop) {
                    return false;
                }
                if !walk(&prop.properties, visit) {
                    return false;
                }
            }
            true
        }
        walk(&self.properties, &mut visit);
    }

    /// The property marked `namespace: true`, if any.
    pub fn namespaced_property(&self) -> Option<&Property> {
        let mut found = None;
        self.loop_properties(|p| {
            if p.namespace {
                found = Some(p.path.clone());
                return false;
            }
            true
        });
        found.and_then(|path| self.property(&path))
    }

    pub fn contains_classifications(&self, needs: &[String]) -> bool {
        needs
            .iter()
            .all(|n| self.classification.is.contains(n) || self.qualified_type_name == *n)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeTemplate {
    /// Qualified-type filters for the endpoints.
    pub source: ResourceId,
    pub target: ResourceId,
    /// Base cost of using this edge during path selection.
    #[serde(default)]
    pub weight: i64,
    /// Classifications an instance of this edge must satisfy.
    #[serde(default)]
    pub classification: Vec<String>,
    /// When true the edge never participates in multi-hop path selection.
    #[serde(default)]
    pub direct_edge_only: bool,
    #[serde(default)]
    pub operational_rules: Vec<OperationalRule>,
}

/// A property write that must wait until the producing endpoint resolves;
/// surfaced to the driver as a synthesized add-constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionDelay {
    pub resource: ResourceId,
    pub property_path: String,
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_with_nested() -> ResourceTemplate {
        let mut t = ResourceTemplate::new("aws:lambda");
        let mut outer = Property {
            type_spec: "map".into(),
            ..Default::default()
        };
        outer.properties.insert(
            "Timeout".into(),
            Property {
                type_spec: "int".into(),
                ..Default::default()
            },
        );
        t.properties.insert("Config".into(), outer);
        t.normalize();
        t
    }

    #[test]
    fn test_normalize_paths() {
        let t = template_with_nested();
        assert_eq!(t.properties["Config"].path, "Config");
        assert_eq!(
            t.properties["Config"].properties["Timeout"].path,
            "Config.Timeout"
        );
    }

    #[test]
    fn test_property_lookup_nested() {
        let t = template_with_nested();
        assert!(t.property("Config.Timeout").is_some());
        assert!(t.property("Config.Missing").is_none());
        assert_eq!(t.property("Config").unwrap().name, "Config");
    }

    #[test]
    fn test_template_id() {
        let t = ResourceTemplate::new("aws:lambda");
        assert_eq!(t.id().qualified_type_name(), "aws:lambda");
        assert!(t.id().name.is_empty());
    }

    #[test]
    fn test_loop_properties_order() {
        let t = template_with_nested();
        let mut seen = Vec::new();
        t.loop_properties(|p| {
            seen.push(p.path.clone());
            true
        });
        assert_eq!(seen, vec!["Config", "Config.Timeout"]);
    }
}
