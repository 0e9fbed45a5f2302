//! Property templates
//!
//! Each template property carries a string-typed declaration (`string`,
//! `int`, `list(resource(aws:subnet))`, `map(string,string)`, …) plus the
//! knobs the engine acts on: default values, namespace marking, the
//! operational rule, and validation bounds.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use weft_construct::{PropertyRef, ResourceId, Value, ValueSet};

use crate::error::{Error, Result};
use crate::expr::{DynamicContext, DynamicData};
use crate::rule::OperationalRule;

/// Parsed form of the property type DSL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyType {
    Any,
    Str,
    Int,
    Float,
    Bool,
    /// Resource id, optionally restricted to the given type filters.
    Resource(Vec<ResourceId>),
    PropertyRef,
    List(Box<PropertyType>),
    Set(Box<PropertyType>),
    Map(Box<PropertyType>, Box<PropertyType>),
}

fn split_args(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < inner.len() || inner.is_empty() {
        parts.push(inner[start..].trim());
    }
    parts
}

impl PropertyType {
    pub fn parse(spec: &str) -> Result<PropertyType> {
        let spec = spec.trim();
        let invalid = || Error::InvalidPropertyType(spec.to_string());
        let (head, inner) = match spec.find('(') {
            Some(open) => {
                let close = spec.rfind(')').ok_or_else(invalid)?;
                (&spec[..open], Some(&spec[open + 1..close]))
            }
            None => (spec, None),
        };
        Ok(match (head, inner) {
            ("any", None) | ("", None) => PropertyType::Any,
            ("string", None) => PropertyType::Str,
            ("int", None) => PropertyType::Int,
            ("float", None) => PropertyType::Float,
            ("bool", None) => PropertyType::Bool,
            ("property_ref", None) => PropertyType::PropertyRef,
            ("resource", None) => PropertyType::Resource(Vec::new()),
            ("resource", Some(inner)) => {
                let mut allowed = Vec::new();
                for arg in split_args(inner) {
                    if arg.is_empty() {
                        continue;
                    }
                    allowed.push(arg.parse::<ResourceId>().map_err(|_| invalid())?);
                }
                PropertyType::Resource(allowed)
            }
            ("list", None) => PropertyType::List(Box::new(PropertyType::Any)),
            ("list", Some(inner)) => PropertyType::List(Box::new(PropertyType::parse(inner)?)),
            ("set", None) => PropertyType::Set(Box::new(PropertyType::Any)),
            ("set", Some(inner)) => PropertyType::Set(Box::new(PropertyType::parse(inner)?)),
            ("map", None) => PropertyType::Map(
                Box::new(PropertyType::Str),
                Box::new(PropertyType::Any),
            ),
            ("map", Some(inner)) => {
                let args = split_args(inner);
                if args.len() != 2 {
                    return Err(invalid());
                }
                PropertyType::Map(
                    Box::new(PropertyType::parse(args[0])?),
                    Box::new(PropertyType::parse(args[1])?),
                )
            }
            _ => return Err(invalid()),
        })
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self,
            PropertyType::List(_) | PropertyType::Set(_) | PropertyType::Map(_, _)
        )
    }

    /// The value an unset property of this type reads as.
    pub fn zero_value(&self) -> Value {
        match self {
            PropertyType::List(_) => Value::List(Vec::new()),
            PropertyType::Set(_) => Value::Set(ValueSet::new()),
            PropertyType::Map(_, _) => Value::Map(IndexMap::new()),
            _ => Value::Null,
        }
    }

    /// Coerce an untyped value (a constraint payload, a templated string, a
    /// decoded document) to this type, executing any `{{ … }}` templates
    /// against the current solution.
    pub fn parse_value(
        &self,
        value: Value,
        ctx: &DynamicContext<'_>,
        data: &DynamicData,
    ) -> Result<Value> {
        let value = match value {
            Value::Str(s) if s.contains("{{") => ctx.execute_value(&s, data)?,
            other => other,
        };
        if value.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = |value: &Value| {
            Error::InvalidPropertyType(format!(
                "cannot use {} value as {:?}",
                value.kind(),
                self
            ))
        };
        Ok(match self {
            PropertyType::Any => value,
            PropertyType::Str => match value {
                Value::Str(s) => Value::Str(s),
                Value::Int(i) => Value::Str(i.to_string()),
                Value::Float(f) => Value::Str(f.to_string()),
                Value::Bool(b) => Value::Str(b.to_string()),
                Value::Id(id) => Value::Str(id.to_string()),
                other => return Err(mismatch(&other)),
            },
            PropertyType::Int => match value {
                Value::Int(i) => Value::Int(i),
                Value::Str(s) => Value::Int(
                    s.trim()
                        .parse::<i64>()
                        .map_err(|_| mismatch(&Value::Str(s.clone())))?,
                ),
                other => return Err(mismatch(&other)),
            },
            PropertyType::Float => match value {
                Value::Float(f) => Value::Float(f),
                Value::Int(i) => Value::Float(i as f64),
                Value::Str(s) => Value::Float(
                    s.trim()
                        .parse::<f64>()
                        .map_err(|_| mismatch(&Value::Str(s.clone())))?,
                ),
                other => return Err(mismatch(&other)),
            },
            PropertyType::Bool => match value {
                Value::Bool(b) => Value::Bool(b),
                Value::Str(s) => match s.trim() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => return Err(mismatch(&Value::Str(s.clone()))),
                },
                other => return Err(mismatch(&other)),
            },
            PropertyType::Resource(_) => match value {
                Value::Id(id) => Value::Id(id),
                Value::Str(s) => Value::Id(
                    s.parse::<ResourceId>()
                        .map_err(|_| mismatch(&Value::Str(s.clone())))?,
                ),
                other => return Err(mismatch(&other)),
            },
            PropertyType::PropertyRef => match value {
                Value::Ref(r) => Value::Ref(r),
                Value::Str(s) => Value::Ref(
                    s.parse::<PropertyRef>()
                        .map_err(|_| mismatch(&Value::Str(s.clone())))?,
                ),
                other => return Err(mismatch(&other)),
            },
            PropertyType::List(item) => {
                let items = match value {
                    Value::List(items) => items,
                    Value::Set(set) => set.to_vec(),
                    // structured template output (e.g. from to_json)
                    Value::Str(s) if s.trim_start().starts_with('[') => {
                        match serde_json::from_str::<serde_json::Value>(&s) {
                            Ok(json) => match Value::from_json(json) {
                                Value::List(items) => items,
                                other => vec![other],
                            },
                            Err(_) => vec![Value::Str(s)],
                        }
                    }
                    single => vec![single],
                };
                Value::List(
                    items
                        .into_iter()
                        .map(|v| item.parse_value(v, ctx, data))
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            PropertyType::Set(item) => {
                let items = match value {
                    Value::List(items) => items,
                    Value::Set(set) => set.to_vec(),
                    single => vec![single],
                };
                let mut set = ValueSet::new();
                for v in items {
                    set.insert(item.parse_value(v, ctx, data)?);
                }
                Value::Set(set)
            }
            PropertyType::Map(_, val_type) => {
                let map = match value {
                    Value::Map(map) => map,
                    // structured template output (e.g. from to_json)
                    Value::Str(s) if s.trim_start().starts_with('{') => {
                        match serde_json::from_str::<serde_json::Value>(&s)
                            .map(Value::from_json)
                        {
                            Ok(Value::Map(map)) => map,
                            _ => return Err(mismatch(&Value::Str(s))),
                        }
                    }
                    other => return Err(mismatch(&other)),
                };
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, val_type.parse_value(v, ctx, data)?);
                }
                Value::Map(out)
            }
        })
    }

    /// Shallow shape check used by validation.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (PropertyType::Any, _) => true,
            (PropertyType::Str, Value::Str(_)) => true,
            (PropertyType::Int, Value::Int(_)) => true,
            (PropertyType::Float, Value::Float(_) | Value::Int(_)) => true,
            (PropertyType::Bool, Value::Bool(_)) => true,
            (PropertyType::Resource(allowed), Value::Id(id)) => {
                allowed.is_empty() || allowed.iter().any(|f| f.matches(id))
            }
            // a ref is acceptable wherever a resource is: it resolves later
            (PropertyType::Resource(_), Value::Ref(_)) => true,
            (PropertyType::PropertyRef, Value::Ref(_)) => true,
            (PropertyType::List(item), Value::List(items)) => {
                items.iter().all(|v| item.accepts(v))
            }
            (PropertyType::Set(item), Value::Set(set)) => set.iter().all(|v| item.accepts(v)),
            (PropertyType::Map(_, val), Value::Map(map)) => {
                map.values().all(|v| val.accepts(v))
            }
            _ => false,
        }
    }
}

/// A property declaration on a resource template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(default)]
    pub name: String,
    /// Full path from the template root, e.g. `Config.Timeout`.
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type", default)]
    pub type_spec: String,
    #[serde(default)]
    pub namespace: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub operational_rule: Option<OperationalRule>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Templated boolean; when present the final value must evaluate truthy.
    #[serde(default)]
    pub validate: String,
    /// Sub-properties for object-valued properties.
    #[serde(default)]
    pub properties: IndexMap<String, Property>,
}

impl Property {
    pub fn property_type(&self) -> Result<PropertyType> {
        PropertyType::parse(&self.type_spec)
    }

    pub fn is_container(&self) -> bool {
        self.property_type()
            .map(|t| t.is_container())
            .unwrap_or(false)
    }

    /// Objects are maps with declared sub-properties; they are not
    /// append-only the way plain maps are.
    pub fn is_object(&self) -> bool {
        self.type_spec.starts_with("map") && !self.properties.is_empty()
    }

    /// Execute the default-value template, if any. A `None` means the
    /// template declares no default.
    pub fn default_value(
        &self,
        ctx: &DynamicContext<'_>,
        data: &DynamicData,
    ) -> Result<Option<Value>> {
        let Some(default) = &self.default_value else {
            return Ok(None);
        };
        let parsed = self.property_type()?.parse_value(default.clone(), ctx, data)?;
        if parsed.is_null() {
            return Ok(None);
        }
        Ok(Some(parsed))
    }

    /// Validate a final value against the declaration. The error string is
    /// recorded as a validation decision, not raised as a solve failure.
    pub fn validate_value(
        &self,
        ctx: &DynamicContext<'_>,
        data: &DynamicData,
        value: &Value,
    ) -> std::result::Result<(), String> {
        if value.is_null() {
            if self.required {
                return Err(format!("required property '{}' is not set", self.path));
            }
            return Ok(());
        }
        let ptype = self
            .property_type()
            .map_err(|e| format!("invalid type declaration: {e}"))?;
        if !ptype.accepts(value) {
            return Err(format!(
                "expected {} value, got {}",
                self.type_spec,
                value.kind()
            ));
        }
        let len = match value {
            Value::List(items) => Some(items.len()),
            Value::Set(set) => Some(set.len()),
            Value::Map(map) => Some(map.len()),
            Value::Str(s) => Some(s.len()),
            _ => None,
        };
        if let (Some(min), Some(len)) = (self.min_length, len) {
            if len < min {
                return Err(format!("length {len} is below minimum {min}"));
            }
        }
        if let (Some(max), Some(len)) = (self.max_length, len) {
            if len > max {
                return Err(format!("length {len} is above maximum {max}"));
            }
        }
        if !self.validate.is_empty() {
            let ok = ctx
                .execute_bool(&self.validate, data)
                .map_err(|e| format!("validate expression failed: {e}"))?;
            if !ok {
                return Err(format!("validate expression '{}' is false", self.validate));
            }
        }
        Ok(())
    }

    /// Whether `current` already contains `candidate` (used for idempotent
    /// writes against imported resources).
    pub fn contains(&self, current: Option<&Value>, candidate: &Value) -> bool {
        match current {
            None | Some(Value::Null) => false,
            Some(Value::List(items)) => items.contains(candidate),
            Some(Value::Set(set)) => set.contains(candidate),
            Some(Value::Map(map)) => match candidate {
                Value::Map(sub) => sub.iter().all(|(k, v)| map.get(k) == Some(v)),
                _ => false,
            },
            Some(existing) => existing == candidate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_types() {
        assert_eq!(
            PropertyType::parse("list(resource(aws:subnet))").unwrap(),
            PropertyType::List(Box::new(PropertyType::Resource(vec![
                "aws:subnet".parse().unwrap()
            ])))
        );
        assert_eq!(
            PropertyType::parse("map(string,int)").unwrap(),
            PropertyType::Map(Box::new(PropertyType::Str), Box::new(PropertyType::Int))
        );
        assert!(PropertyType::parse("tuple(int)").is_err());
    }

    #[test]
    fn test_accepts_resource_filters() {
        let t = PropertyType::parse("resource(aws:subnet)").unwrap();
        assert!(t.accepts(&Value::Id("aws:subnet:s1".parse().unwrap())));
        assert!(!t.accepts(&Value::Id("aws:vpc:v1".parse().unwrap())));
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(
            PropertyType::parse("list(int)").unwrap().zero_value(),
            Value::List(vec![])
        );
        assert_eq!(PropertyType::parse("int").unwrap().zero_value(), Value::Null);
    }

    #[test]
    fn test_contains_for_imported_idempotence() {
        let p = Property::default();
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert!(p.contains(Some(&list), &Value::Int(2)));
        assert!(!p.contains(Some(&list), &Value::Int(3)));
        assert!(p.contains(Some(&Value::Int(5)), &Value::Int(5)));
    }
}
