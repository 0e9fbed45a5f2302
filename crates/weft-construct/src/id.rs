//! Resource identity
//!
//! A [`ResourceId`] is a four-part identifier `provider:type[:namespace]:name`.
//! Empty fields act as wildcards in [`ResourceId::matches`], which is how
//! selector filters are expressed throughout the knowledge base.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

fn valid_qualified_part(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn valid_name_part(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-' | '[' | ']' | '#'))
}

/// A four-tuple resource identity, case-sensitive in all fields.
///
/// The zero value (all fields empty) is a valid "unset" id; see
/// [`ResourceId::is_zero`].
#[derive(
    Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceId {
    pub provider: String,
    pub r#type: String,
    /// Optional; disambiguates resources with the same name, e.g. a subnet
    /// within a particular network.
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(provider: &str, r#type: &str, name: &str) -> Self {
        Self {
            provider: provider.into(),
            r#type: r#type.into(),
            namespace: String::new(),
            name: name.into(),
        }
    }

    pub fn with_namespace(provider: &str, r#type: &str, namespace: &str, name: &str) -> Self {
        Self {
            provider: provider.into(),
            r#type: r#type.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The `provider:type` pair identifying the template this id instantiates.
    pub fn qualified_type_name(&self) -> String {
        format!("{}:{}", self.provider, self.r#type)
    }

    pub fn is_zero(&self) -> bool {
        self.provider.is_empty()
            && self.r#type.is_empty()
            && self.namespace.is_empty()
            && self.name.is_empty()
    }

    /// Uses `self` as a filter for `other`: every non-empty field of `self`
    /// must equal the corresponding field of `other`.
    pub fn matches(&self, other: &ResourceId) -> bool {
        (self.provider.is_empty() || self.provider == other.provider)
            && (self.r#type.is_empty() || self.r#type == other.r#type)
            && (self.namespace.is_empty() || self.namespace == other.namespace)
            && (self.name.is_empty() || self.name == other.name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return Ok(());
        }
        write!(f, "{}:{}", self.provider, self.r#type)?;
        if !self.namespace.is_empty() || self.name.contains(':') {
            write!(f, ":{}", self.namespace)?;
        }
        if !self.name.is_empty() {
            write!(f, ":{}", self.name)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(ResourceId::default());
        }
        let invalid = || Error::InvalidResourceId(s.to_string());
        let parts: Vec<&str> = s.splitn(4, ':').collect();
        let id = match parts.as_slice() {
            [provider, r#type] => ResourceId {
                provider: provider.to_string(),
                r#type: r#type.to_string(),
                namespace: String::new(),
                name: String::new(),
            },
            [provider, r#type, name] => ResourceId::new(provider, r#type, name),
            [provider, r#type, namespace, name] => {
                ResourceId::with_namespace(provider, r#type, namespace, name)
            }
            _ => return Err(invalid()),
        };
        if !valid_qualified_part(&id.provider)
            || !valid_qualified_part(&id.r#type)
            || !valid_name_part(&id.namespace)
            || !valid_name_part(&id.name)
            || id.namespace.contains(':')
        {
            return Err(invalid());
        }
        Ok(id)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> String {
        id.to_string()
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A first-class `(resource, property)` pair usable as a property value;
/// denotes "the value of that property on that resource, resolved on read".
#[derive(
    Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct PropertyRef {
    pub resource: ResourceId,
    pub property: String,
}

impl PropertyRef {
    pub fn new(resource: ResourceId, property: impl Into<String>) -> Self {
        Self {
            resource,
            property: property.into(),
        }
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.property)
    }
}

impl FromStr for PropertyRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (res, prop) = s
            .split_once('#')
            .ok_or_else(|| Error::InvalidPropertyRef(s.to_string()))?;
        Ok(PropertyRef {
            resource: res.parse()?,
            property: prop.to_string(),
        })
    }
}

impl From<PropertyRef> for String {
    fn from(r: PropertyRef) -> String {
        r.to_string()
    }
}

impl TryFrom<String> for PropertyRef {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A directed source→target pair without edge data.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct SimpleEdge {
    pub source: ResourceId,
    pub target: ResourceId,
}

impl SimpleEdge {
    pub fn new(source: ResourceId, target: ResourceId) -> Self {
        Self { source, target }
    }
}

impl fmt::Display for SimpleEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

impl FromStr for SimpleEdge {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (src, tgt) = s
            .split_once("->")
            .ok_or_else(|| Error::InvalidEdge(s.to_string()))?;
        Ok(SimpleEdge {
            source: src.trim().parse()?,
            target: tgt.trim().parse()?,
        })
    }
}

impl From<SimpleEdge> for String {
    fn from(e: SimpleEdge) -> String {
        e.to_string()
    }
}

impl TryFrom<String> for SimpleEdge {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        for text in ["aws:subnet:vpc1:sn1", "aws:vpc:main", "p:t:n"] {
            let id: ResourceId = text.parse().unwrap();
            assert_eq!(id.to_string(), text);
            assert_eq!(id.to_string().parse::<ResourceId>().unwrap(), id);
        }
    }

    #[test]
    fn test_id_fields() {
        let id: ResourceId = "aws:subnet:vpc1:sn1".parse().unwrap();
        assert_eq!(id.provider, "aws");
        assert_eq!(id.r#type, "subnet");
        assert_eq!(id.namespace, "vpc1");
        assert_eq!(id.name, "sn1");
        assert_eq!(id.qualified_type_name(), "aws:subnet");
    }

    #[test]
    fn test_id_rejects_bad_chars() {
        assert!("a$b:t:n".parse::<ResourceId>().is_err());
        assert!("a:t y:n".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_matches_wildcards() {
        let filter: ResourceId = "aws:subnet".parse().unwrap();
        let concrete: ResourceId = "aws:subnet:vpc1:sn1".parse().unwrap();
        assert!(filter.matches(&concrete));
        assert!(!concrete.matches(&filter));

        let zero = ResourceId::default();
        assert!(zero.matches(&concrete));
    }

    #[test]
    fn test_property_ref_roundtrip() {
        let r: PropertyRef = "aws:lambda:fn#Role".parse().unwrap();
        assert_eq!(r.property, "Role");
        assert_eq!(r.to_string(), "aws:lambda:fn#Role");
    }

    #[test]
    fn test_simple_edge_parse() {
        let e: SimpleEdge = "a:b:c -> d:e:f".parse().unwrap();
        assert_eq!(e.source.name, "c");
        assert_eq!(e.target.name, "f");
        assert_eq!(e.to_string(), "a:b:c -> d:e:f");
    }
}
