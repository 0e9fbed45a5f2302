//! Constraints
//!
//! The declarative intents the driver hands the solver. Each document
//! carries a `scope` tag selecting the constraint kind; ids use their text
//! form and edges the `src -> tgt` form.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use weft_construct::{ResourceId, SimpleEdge, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOperator {
    MustExist,
    MustNotExist,
    MustContain,
    MustNotContain,
    Add,
    Remove,
    Replace,
    Equals,
}

/// Application-scope: add/remove/replace whole resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConstraint {
    pub operator: ConstraintOperator,
    pub node: ResourceId,
    #[serde(default)]
    pub replacement_node: Option<ResourceId>,
}

/// Construct-scope: bind an abstract resource to a concrete qualified type
/// and attribute set for expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructConstraint {
    pub target: ResourceId,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default)]
    pub attributes: IndexMap<String, Value>,
}

/// Edge-scope: require or forbid connectivity, optionally through a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeConstraint {
    pub operator: ConstraintOperator,
    pub target: SimpleEdge,
    /// For `must_contain`/`must_not_contain`: the node the path between the
    /// endpoints must (not) include.
    #[serde(default)]
    pub node: Option<ResourceId>,
}

/// Resource-scope: pin or extend a single property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConstraint {
    pub operator: ConstraintOperator,
    pub target: ResourceId,
    pub property: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Constraint {
    Application(ApplicationConstraint),
    Construct(ConstructConstraint),
    Edge(EdgeConstraint),
    Resource(ResourceConstraint),
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::Application(c) => {
                write!(f, "application {:?} {}", c.operator, c.node)
            }
            Constraint::Construct(c) => write!(f, "construct {} as {}", c.target, c.r#type),
            Constraint::Edge(c) => write!(f, "edge {:?} {}", c.operator, c.target),
            Constraint::Resource(c) => {
                write!(f, "resource {:?} {}#{}", c.operator, c.target, c.property)
            }
        }
    }
}

/// Constraints grouped by scope, preserving document order within each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintList {
    pub application: Vec<ApplicationConstraint>,
    pub construct: Vec<ConstructConstraint>,
    pub edge: Vec<EdgeConstraint>,
    pub resource: Vec<ResourceConstraint>,
}

impl ConstraintList {
    pub fn len(&self) -> usize {
        self.application.len() + self.construct.len() + self.edge.len() + self.resource.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Constraint>> for ConstraintList {
    fn from(items: Vec<Constraint>) -> Self {
        let mut list = ConstraintList::default();
        for item in items {
            match item {
                Constraint::Application(c) => list.application.push(c),
                Constraint::Construct(c) => list.construct.push(c),
                Constraint::Edge(c) => list.edge.push(c),
                Constraint::Resource(c) => list.resource.push(c),
            }
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_tagged_deserialization() {
        let docs = serde_json::json!([
            {"scope": "resource", "operator": "equals", "target": "p:t:a", "property": "count", "value": 7},
            {"scope": "edge", "operator": "must_exist", "target": "p:t:a -> p:t:b"},
            {"scope": "application", "operator": "add", "node": "p:t:c"},
        ]);
        let parsed: Vec<Constraint> = serde_json::from_value(docs).unwrap();
        let list = ConstraintList::from(parsed);
        assert_eq!(list.resource.len(), 1);
        assert_eq!(list.resource[0].value, Value::Int(7));
        assert_eq!(list.edge[0].target.target, "p:t:b".parse().unwrap());
        assert_eq!(list.application[0].operator, ConstraintOperator::Add);
    }

    #[test]
    fn test_scope_roundtrip() {
        let c = Constraint::Resource(ResourceConstraint {
            operator: ConstraintOperator::Equals,
            target: "p:t:a".parse().unwrap(),
            property: "count".into(),
            value: Value::Int(7),
        });
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["scope"], "resource");
        let back: Constraint = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }
}
