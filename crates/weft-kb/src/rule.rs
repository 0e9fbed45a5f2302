//! Operational rules
//!
//! A rule is a templated side-effect attached to a property, a resource
//! template, or an edge template. It fires when the owning vertex
//! evaluates: an optional `if` gate, configuration rules that write fields
//! on (possibly other) resources, and an optional step that ensures N
//! neighbours exist in a direction.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use weft_construct::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Downstream,
    Upstream,
}

/// Tests a candidate resource for an operational step: by id/type filter,
/// by required classifications, and/or by a templated predicate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSelector {
    /// Templated resource id; non-empty fields of the decoded id act as
    /// wildcards per `ResourceId::matches`.
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub classifications: Vec<String>,
    /// Templated boolean; when present the candidate must evaluate truthy.
    #[serde(default)]
    pub can_use: String,
}

/// The "ensure N neighbours in this direction" subcomponent of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OperationalStep {
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub resources: Vec<ResourceSelector>,
    #[serde(default)]
    pub num_needed: usize,
    #[serde(default)]
    pub fail_if_missing: bool,
    /// When set, the owning property receives a property ref to this field
    /// of the satisfying resource instead of its id.
    #[serde(default)]
    pub use_property_ref: String,
}

/// A single `{field, value}` write against a templated resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub field: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRule {
    /// Templated resource id the configuration applies to.
    pub resource: String,
    pub config: Configuration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalRule {
    /// Templated condition; a falsy result skips the rule entirely.
    #[serde(default, rename = "if")]
    pub if_condition: String,
    #[serde(default)]
    pub configuration_rules: Vec<ConfigurationRule>,
    #[serde(default)]
    pub step: Option<OperationalStep>,
}

impl OperationalRule {
    /// Stable identity for rule buckets and resource-rule vertex keys:
    /// the hash of the rule's canonical JSON serialization.
    pub fn hash_key(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        json.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

impl OperationalStep {
    /// The number of satisfying neighbours required; zero in the template
    /// means one.
    pub fn required(&self) -> usize {
        if self.num_needed == 0 {
            1
        } else {
            self.num_needed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_hash_stable_and_distinct() {
        let a = OperationalRule {
            if_condition: String::new(),
            configuration_rules: vec![],
            step: Some(OperationalStep {
                direction: Direction::Upstream,
                num_needed: 1,
                ..Default::default()
            }),
        };
        let mut b = a.clone();
        assert_eq!(a.hash_key(), b.hash_key());
        b.step.as_mut().unwrap().num_needed = 2;
        assert_ne!(a.hash_key(), b.hash_key());
    }

    #[test]
    fn test_step_required_defaults_to_one() {
        let step = OperationalStep::default();
        assert_eq!(step.required(), 1);
    }
}
