//! Resources
//!
//! A [`Resource`] is a node in the solution graph: an identity plus a
//! property tree. `imported` marks a pre-existing resource whose
//! configuration the engine must not change (id namespacing excepted).

use serde::{Deserialize, Serialize};

use crate::error::PathError;
use crate::id::ResourceId;
use crate::path::{self, PathSegment, PropertyPath};
use crate::value::Value;

pub use crate::path::Properties;

/// Visitor verdict for [`Resource::walk_properties`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    SkipSubtree,
    Stop,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub imported: bool,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            properties: Properties::new(),
            imported: false,
        }
    }

    pub fn imported(id: ResourceId) -> Self {
        Self {
            id,
            properties: Properties::new(),
            imported: true,
        }
    }

    pub fn get_property(&self, path: &PropertyPath) -> Result<Option<&Value>, PathError> {
        path::get(&self.properties, path)
    }

    pub fn set_property(&mut self, path: &PropertyPath, value: Value) -> Result<(), PathError> {
        path::set(&mut self.properties, path, value)
    }

    pub fn append_property(&mut self, path: &PropertyPath, value: Value) -> Result<(), PathError> {
        path::append(&mut self.properties, path, value)
    }

    pub fn remove_property(
        &mut self,
        path: &PropertyPath,
        value: Option<Value>,
    ) -> Result<(), PathError> {
        path::remove(&mut self.properties, path, value)
    }

    /// Depth-first pre-order walk over every property value. Map values are
    /// visited sorted by the string form of their key; list items are visited
    /// from the last index to the first so that visitors removing items do
    /// not skip any.
    pub fn walk_properties<F>(&self, mut visit: F)
    where
        F: FnMut(&PropertyPath, &Value) -> Walk,
    {
        let mut queue: Vec<(PropertyPath, &Value)> = Vec::new();
        let mut keys: Vec<&String> = self.properties.keys().collect();
        keys.sort();
        for key in keys.into_iter().rev() {
            queue.push((
                PropertyPath::new(vec![PathSegment::Field(key.clone())]),
                &self.properties[key.as_str()],
            ));
        }
        // queue is LIFO with children pushed in reverse, which yields
        // pre-order traversal in sorted key order.
        while let Some((current, value)) = queue.pop() {
            match visit(&current, value) {
                Walk::Stop => return,
                Walk::SkipSubtree => continue,
                Walk::Continue => {}
            }
            match value {
                Value::Map(map) => {
                    let mut keys: Vec<&String> = map.keys().collect();
                    keys.sort();
                    for key in keys.into_iter().rev() {
                        queue.push((
                            current.append(PathSegment::Field(key.clone())),
                            &map[key.as_str()],
                        ));
                    }
                }
                Value::List(items) => {
                    for (i, item) in items.iter().enumerate() {
                        queue.push((current.append(PathSegment::Index(i)), item));
                    }
                }
                Value::Set(set) => {
                    let mut items: Vec<(String, &Value)> = set
                        .iter()
                        .map(|v| (v.to_string(), v))
                        .collect();
                    items.sort_by(|a, b| a.0.cmp(&b.0));
                    for (i, (_, item)) in items.into_iter().enumerate().rev() {
                        queue.push((current.append(PathSegment::Index(i)), item));
                    }
                }
                _ => {}
            }
        }
    }

    /// Rewrite any occurrence of `old` in property values to `new`.
    /// Returns true if anything changed.
    pub fn rewrite_ids(&mut self, old: &ResourceId, new: &ResourceId) -> bool {
        let mut changed = false;
        for value in self.properties.values_mut() {
            changed |= value.rewrite_id(old, new);
        }
        changed
    }

    /// Every resource id referenced from this resource's properties.
    pub fn referenced_ids(&self) -> Vec<ResourceId> {
        let mut out = Vec::new();
        for value in self.properties.values() {
            value.referenced_ids(&mut out);
        }
        out
    }
}
