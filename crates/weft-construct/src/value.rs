//! Property values
//!
//! The property tree is a tagged sum over scalars, resource ids, property
//! refs, and the three container shapes. Containers preserve insertion
//! order; set membership is structural equality.

use std::fmt;

use indexmap::IndexMap;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::id::{PropertyRef, ResourceId};

/// A single value in a resource's property tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Id(ResourceId),
    Ref(PropertyRef),
    List(Vec<Value>),
    Set(ValueSet),
    Map(IndexMap<String, Value>),
}

/// An insertion-ordered set deduplicated by structural equality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSet {
    items: Vec<Value>,
}

impl ValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert preserving first-insertion order; returns false if already present.
    pub fn insert(&mut self, value: Value) -> bool {
        if self.items.contains(&value) {
            return false;
        }
        self.items.push(value);
        true
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.contains(value)
    }

    pub fn remove(&mut self, value: &Value) -> bool {
        match self.items.iter().position(|v| v == value) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items.clone()
    }
}

impl FromIterator<Value> for ValueSet {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        let mut set = ValueSet::new();
        for v in iter {
            set.insert(v);
        }
        set
    }
}

impl IntoIterator for ValueSet {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Id(_) => "resource",
            Value::Ref(_) => "property_ref",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<&ResourceId> {
        match self {
            Value::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_ref_value(&self) -> Option<&PropertyRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&ValueSet> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Truthiness used by templated `if` conditions: null, false, zero, empty
    /// string, and empty containers are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Id(id) => !id.is_zero(),
            Value::Ref(_) => true,
            Value::List(l) => !l.is_empty(),
            Value::Set(s) => !s.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Every [`ResourceId`] mentioned anywhere in this value, including inside
    /// property refs.
    pub fn referenced_ids(&self, out: &mut Vec<ResourceId>) {
        match self {
            Value::Id(id) => out.push(id.clone()),
            Value::Ref(r) => out.push(r.resource.clone()),
            Value::List(items) => {
                for v in items {
                    v.referenced_ids(out);
                }
            }
            Value::Set(set) => {
                for v in set.iter() {
                    v.referenced_ids(out);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    v.referenced_ids(out);
                }
            }
            _ => {}
        }
    }

    /// Rewrite every occurrence of `old` (as an id or a ref target) to `new`.
    /// Returns true if anything changed.
    pub fn rewrite_id(&mut self, old: &ResourceId, new: &ResourceId) -> bool {
        match self {
            Value::Id(id) => {
                if id == old {
                    *id = new.clone();
                    return true;
                }
                false
            }
            Value::Ref(r) => {
                if &r.resource == old {
                    r.resource = new.clone();
                    return true;
                }
                false
            }
            Value::List(items) => {
                let mut changed = false;
                for v in items {
                    changed |= v.rewrite_id(old, new);
                }
                changed
            }
            Value::Set(set) => {
                let mut changed = false;
                let mut rewritten = ValueSet::new();
                for mut v in std::mem::take(&mut set.items) {
                    changed |= v.rewrite_id(old, new);
                    rewritten.insert(v);
                }
                *set = rewritten;
                changed
            }
            Value::Map(map) => {
                let mut changed = false;
                for v in map.values_mut() {
                    changed |= v.rewrite_id(old, new);
                }
                changed
            }
            _ => false,
        }
    }

    /// Convert a JSON document into a value tree. Strings stay strings; the
    /// knowledge base's typed parse turns them into ids or refs where the
    /// template calls for it.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Id(id) => serde_json::Value::String(id.to_string()),
            Value::Ref(r) => serde_json::Value::String(r.to_string()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Set(set) => serde_json::Value::Array(set.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str(""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Id(id) => write!(f, "{id}"),
            Value::Ref(r) => write!(f, "{r}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ResourceId> for Value {
    fn from(id: ResourceId) -> Self {
        Value::Id(id)
    }
}

impl From<PropertyRef> for Value {
    fn from(r: PropertyRef) -> Self {
        Value::Ref(r)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Id(id) => serializer.serialize_str(&id.to_string()),
            Value::Ref(r) => serializer.serialize_str(&r.to_string()),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for v in items {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Set(set) => {
                let mut seq = serializer.serialize_seq(Some(set.len()))?;
                for v in set.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_dedup_preserves_order() {
        let mut set = ValueSet::new();
        assert!(set.insert(Value::Int(2)));
        assert!(set.insert(Value::Int(1)));
        assert!(!set.insert(Value::Int(2)));
        assert_eq!(set.as_slice(), &[Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn test_rewrite_id_nested() {
        let old = ResourceId::new("p", "t", "old");
        let new = ResourceId::new("p", "t", "new");
        let mut v = Value::Map(IndexMap::from([(
            "ids".to_string(),
            Value::List(vec![
                Value::Id(old.clone()),
                Value::Ref(PropertyRef::new(old.clone(), "addr")),
            ]),
        )]));
        assert!(v.rewrite_id(&old, &new));
        let list = v.as_map().unwrap()["ids"].as_list().unwrap();
        assert_eq!(list[0], Value::Id(new.clone()));
        assert_eq!(list[1].as_ref_value().unwrap().resource, new);
    }

    #[test]
    fn test_json_roundtrip_shapes() {
        let v = Value::from_json(serde_json::json!({"a": [1, "x"], "b": true}));
        let m = v.as_map().unwrap();
        assert_eq!(m["a"].as_list().unwrap()[0], Value::Int(1));
        assert_eq!(m["b"], Value::Bool(true));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Int(3).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
    }
}
