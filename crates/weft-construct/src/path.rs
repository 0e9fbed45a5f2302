//! Property paths
//!
//! A [`PropertyPath`] indexes (potentially deeply) into a resource's
//! property tree. The text syntax is dot-separated field names with
//! bracketed numeric indices (`a[0].b`) and bracketed string keys for keys
//! containing `.` or `[` (`a[key.with.dots]`).
//!
//! All mutation of property trees flows through the operations here; they
//! return [`PathError`] rather than panicking on malformed paths or shape
//! mismatches.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::error::{PathError, PathOp};
use crate::value::Value;

/// One step of a property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A parsed, navigable pointer into a property tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyPath {
    segments: Vec<PathSegment>,
}

pub type Properties = IndexMap<String, Value>;

impl PropertyPath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    pub fn parse(text: &str) -> Result<Self, PathError> {
        let err = |cause: &str| PathError::new(text, PathOp::Parse, cause);
        if text.is_empty() {
            return Err(err("empty path"));
        }
        let bytes = text.as_bytes();
        let mut segments = Vec::new();
        let mut i = 0usize;
        // A separator is required before every segment except the first;
        // bracketed segments are self-delimiting.
        let mut first = true;
        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    if first {
                        return Err(err("path cannot start with '.'"));
                    }
                    i += 1;
                    if i >= bytes.len() || matches!(bytes[i], b'.' | b']') {
                        return Err(err("empty path part"));
                    }
                    if bytes[i] == b'[' {
                        return Err(err("'.' before '[' is redundant"));
                    }
                    let start = i;
                    while i < bytes.len() && !matches!(bytes[i], b'.' | b'[') {
                        if bytes[i] == b']' {
                            return Err(err("unbalanced ']'"));
                        }
                        i += 1;
                    }
                    segments.push(PathSegment::Field(text[start..i].to_string()));
                }
                b'[' => {
                    let mut depth = 1usize;
                    let start = i + 1;
                    i += 1;
                    while i < bytes.len() && depth > 0 {
                        match bytes[i] {
                            b'[' => depth += 1,
                            b']' => depth -= 1,
                            _ => {}
                        }
                        i += 1;
                    }
                    if depth != 0 {
                        return Err(err("unbalanced '['"));
                    }
                    let inner = &text[start..i - 1];
                    if inner.is_empty() {
                        return Err(err("empty brackets"));
                    }
                    match inner.parse::<usize>() {
                        Ok(idx) => segments.push(PathSegment::Index(idx)),
                        // `MyMap[key.with.periods]` form
                        Err(_) => segments.push(PathSegment::Field(inner.to_string())),
                    }
                    first = false;
                    continue;
                }
                b']' => return Err(err("unbalanced ']'")),
                _ => {
                    if !first {
                        return Err(err("expected '.' or '[' to start path part"));
                    }
                    let start = i;
                    while i < bytes.len() && !matches!(bytes[i], b'.' | b'[') {
                        if bytes[i] == b']' {
                            return Err(err("unbalanced ']'"));
                        }
                        i += 1;
                    }
                    segments.push(PathSegment::Field(text[start..i].to_string()));
                }
            }
            first = false;
        }
        if segments.is_empty() {
            return Err(err("empty path"));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Canonical part strings; concatenating them re-stringifies the path.
    pub fn parts(&self) -> Vec<String> {
        self.segments
            .iter()
            .enumerate()
            .map(|(i, seg)| match seg {
                PathSegment::Field(name) => {
                    if name.contains('.') || name.contains('[') {
                        format!("[{name}]")
                    } else if i > 0 {
                        format!(".{name}")
                    } else {
                        name.clone()
                    }
                }
                PathSegment::Index(idx) => format!("[{idx}]"),
            })
            .collect()
    }

    pub fn append(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            None
        } else {
            Some(Self {
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }

    pub fn starts_with(&self, prefix: &PropertyPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parts().concat())
    }
}

impl FromStr for PropertyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn expected(op: PathOp, path: &PropertyPath, wanted: &str, got: &Value) -> PathError {
    PathError::new(
        path.to_string(),
        op,
        format!("expected {wanted}, got {}", got.kind()),
    )
}

/// Read the value at `path`. Missing locations resolve to `None`; shape
/// mismatches along the way are errors.
pub fn get<'a>(
    root: &'a Properties,
    path: &PropertyPath,
) -> Result<Option<&'a Value>, PathError> {
    let mut segs = path.segments().iter();
    let first = match segs.next() {
        Some(PathSegment::Field(name)) => name,
        _ => {
            return Err(PathError::new(
                path.to_string(),
                PathOp::Get,
                "path must start with a field name",
            ))
        }
    };
    let mut current = match root.get(first) {
        Some(v) => v,
        None => return Ok(None),
    };
    for seg in segs {
        match seg {
            PathSegment::Field(name) => match current {
                Value::Map(map) => match map.get(name) {
                    Some(v) => current = v,
                    None => return Ok(None),
                },
                Value::Null => return Ok(None),
                other => return Err(expected(PathOp::Get, path, "map", other)),
            },
            PathSegment::Index(idx) => match current {
                Value::List(items) => match items.get(*idx) {
                    Some(v) => current = v,
                    None => return Ok(None),
                },
                Value::Set(set) => match set.as_slice().get(*idx) {
                    Some(v) => current = v,
                    None => return Ok(None),
                },
                Value::Null => return Ok(None),
                other => return Err(expected(PathOp::Get, path, "list", other)),
            },
        }
    }
    Ok(Some(current))
}

fn descend<'a>(
    op: PathOp,
    path: &PropertyPath,
    root: &'a mut Properties,
    upto: usize,
    create: bool,
) -> Result<Option<&'a mut Value>, PathError> {
    let segs = path.segments();
    let first = match segs.first() {
        Some(PathSegment::Field(name)) => name.clone(),
        _ => {
            return Err(PathError::new(
                path.to_string(),
                op,
                "path must start with a field name",
            ))
        }
    };
    let mut current = if create {
        root.entry(first).or_insert(Value::Null)
    } else {
        match root.get_mut(&first) {
            Some(v) => v,
            None => return Ok(None),
        }
    };
    for seg in &segs[1..upto] {
        match seg {
            PathSegment::Field(name) => {
                // Set on a missing intermediate map creates the map and links
                // it to the parent.
                if create && current.is_null() {
                    *current = Value::Map(IndexMap::new());
                }
                match current {
                    Value::Map(map) => {
                        current = if create {
                            map.entry(name.clone()).or_insert(Value::Null)
                        } else {
                            match map.get_mut(name) {
                                Some(v) => v,
                                None => return Ok(None),
                            }
                        };
                    }
                    other => return Err(expected(op, path, "map", other)),
                }
            }
            PathSegment::Index(idx) => match current {
                Value::List(items) => {
                    let len = items.len();
                    current = items.get_mut(*idx).ok_or_else(|| {
                        PathError::new(
                            path.to_string(),
                            op,
                            format!("array index out of bounds: {idx} (length {len})"),
                        )
                    })?;
                }
                Value::Null => {
                    if create {
                        return Err(PathError::new(
                            path.to_string(),
                            op,
                            "cannot create list through missing index",
                        ));
                    }
                    return Ok(None);
                }
                other => return Err(expected(op, path, "list", other)),
            },
        }
    }
    Ok(Some(current))
}

/// Overwrite the value at `path`, creating intermediate maps as needed.
pub fn set(root: &mut Properties, path: &PropertyPath, value: Value) -> Result<(), PathError> {
    let slot = descend(PathOp::Set, path, root, path.len(), true)?
        .expect("creating descend always yields a slot");
    *slot = value;
    Ok(())
}

fn append_into(path: &PropertyPath, slot: &mut Value, value: Value) -> Result<(), PathError> {
    // Appending to an empty location infers the container kind from the value.
    if slot.is_null() {
        *slot = match value {
            Value::List(items) => {
                let mut list: Vec<Value> = Vec::with_capacity(items.len());
                for v in items {
                    if !list.contains(&v) {
                        list.push(v);
                    }
                }
                Value::List(list)
            }
            Value::Set(set) => Value::Set(set),
            Value::Map(map) => Value::Map(map),
            scalar => Value::List(vec![scalar]),
        };
        return Ok(());
    }
    match slot {
        Value::List(items) => {
            let incoming = match value {
                Value::List(vs) => vs,
                Value::Set(set) => set.to_vec(),
                single => vec![single],
            };
            for v in incoming {
                if !items.contains(&v) {
                    items.push(v);
                }
            }
            Ok(())
        }
        Value::Set(set) => {
            let incoming = match value {
                Value::List(vs) => vs,
                Value::Set(s) => s.to_vec(),
                single => vec![single],
            };
            for v in incoming {
                set.insert(v);
            }
            Ok(())
        }
        Value::Map(map) => match value {
            Value::Map(incoming) => {
                for (k, v) in incoming {
                    map.insert(k, v);
                }
                Ok(())
            }
            other => Err(expected(PathOp::Append, path, "map value for append", &other)),
        },
        other => Err(PathError::new(
            path.to_string(),
            PathOp::Append,
            format!("expected list, set, or map destination for append, got {}", other.kind()),
        )),
    }
}

/// Append `value` at `path`: lists deduplicate by structural equality, maps
/// merge key-by-key overwriting, and empty locations infer their container
/// kind from the value.
pub fn append(root: &mut Properties, path: &PropertyPath, value: Value) -> Result<(), PathError> {
    let slot = descend(PathOp::Append, path, root, path.len(), true)?
        .expect("creating descend always yields a slot");
    append_into(path, slot, value)
}

/// Remove at `path`. With `Some(value)` removes that item from the list or
/// set at the path; with `None` removes the path itself.
pub fn remove(
    root: &mut Properties,
    path: &PropertyPath,
    value: Option<Value>,
) -> Result<(), PathError> {
    match value {
        None => {
            let segs = path.segments();
            let last = segs.last().ok_or_else(|| {
                PathError::new(path.to_string(), PathOp::Remove, "empty path")
            })?;
            if segs.len() == 1 {
                if let PathSegment::Field(name) = last {
                    root.shift_remove(name);
                    return Ok(());
                }
                return Err(PathError::new(
                    path.to_string(),
                    PathOp::Remove,
                    "path must start with a field name",
                ));
            }
            let parent = match descend(PathOp::Remove, path, root, segs.len() - 1, false)? {
                Some(v) => v,
                None => return Ok(()),
            };
            match (last, parent) {
                (PathSegment::Field(name), Value::Map(map)) => {
                    map.shift_remove(name);
                    Ok(())
                }
                (PathSegment::Index(idx), Value::List(items)) => {
                    let len = items.len();
                    if *idx >= len {
                        return Err(PathError::new(
                            path.to_string(),
                            PathOp::Remove,
                            format!("array index out of bounds: {idx} (length {len})"),
                        ));
                    }
                    items.remove(*idx);
                    Ok(())
                }
                (PathSegment::Field(_), other) => {
                    Err(expected(PathOp::Remove, path, "map", other))
                }
                (PathSegment::Index(_), other) => {
                    Err(expected(PathOp::Remove, path, "list", other))
                }
            }
        }
        Some(value) => {
            let slot = match descend(PathOp::Remove, path, root, path.len(), false)? {
                Some(v) => v,
                None => {
                    return Err(PathError::new(
                        path.to_string(),
                        PathOp::Remove,
                        "value not found: path is unset",
                    ))
                }
            };
            match slot {
                Value::List(items) => {
                    let before = items.len();
                    items.retain(|v| v != &value);
                    if items.len() == before {
                        return Err(PathError::new(
                            path.to_string(),
                            PathOp::Remove,
                            format!("value {value} not found in list"),
                        ));
                    }
                    Ok(())
                }
                Value::Set(set) => {
                    if !set.remove(&value) {
                        return Err(PathError::new(
                            path.to_string(),
                            PathOp::Remove,
                            format!("value {value} not found in set"),
                        ));
                    }
                    Ok(())
                }
                other => Err(PathError::new(
                    path.to_string(),
                    PathOp::Remove,
                    format!(
                        "for non-nil value ({value}), must be list or set (got {}) to remove by value",
                        other.kind()
                    ),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> PropertyPath {
        PropertyPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_roundtrip() {
        for s in ["a", "a.b.c", "a[0].b", "a[key.with.dots]", "a.b[2]"] {
            assert_eq!(path(s).to_string(), s);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(PropertyPath::parse("").is_err());
        assert!(PropertyPath::parse("a[").is_err());
        assert!(PropertyPath::parse("a]b").is_err());
        assert!(PropertyPath::parse("a..b").is_err());
    }

    #[test]
    fn test_set_then_get() {
        let mut props = Properties::new();
        set(&mut props, &path("a.b.c"), Value::Int(7)).unwrap();
        assert_eq!(get(&props, &path("a.b.c")).unwrap(), Some(&Value::Int(7)));
        // intermediate maps were created
        assert!(matches!(get(&props, &path("a.b")).unwrap(), Some(Value::Map(_))));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut props = Properties::new();
        set(&mut props, &path("a"), Value::Int(1)).unwrap();
        assert!(set(&mut props, &path("a.b"), Value::Int(2)).is_err());
    }

    #[test]
    fn test_append_dedup() {
        let mut props = Properties::new();
        append(&mut props, &path("ids"), Value::Str("x".into())).unwrap();
        append(&mut props, &path("ids"), Value::Str("x".into())).unwrap();
        append(&mut props, &path("ids"), Value::Str("y".into())).unwrap();
        let list = get(&props, &path("ids")).unwrap().unwrap().as_list().unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_append_infers_container() {
        let mut props = Properties::new();
        append(&mut props, &path("tags"), Value::Map(Properties::new())).unwrap();
        assert!(matches!(get(&props, &path("tags")).unwrap(), Some(Value::Map(_))));

        let mut props = Properties::new();
        append(&mut props, &path("n"), Value::Int(1)).unwrap();
        assert!(matches!(get(&props, &path("n")).unwrap(), Some(Value::List(_))));
    }

    #[test]
    fn test_append_map_merges() {
        let mut props = Properties::new();
        let m1: Properties = [("a".to_string(), Value::Int(1))].into_iter().collect();
        let m2: Properties = [
            ("a".to_string(), Value::Int(2)),
            ("b".to_string(), Value::Int(3)),
        ]
        .into_iter()
        .collect();
        append(&mut props, &path("cfg"), Value::Map(m1)).unwrap();
        append(&mut props, &path("cfg"), Value::Map(m2)).unwrap();
        let map = get(&props, &path("cfg")).unwrap().unwrap().as_map().unwrap();
        assert_eq!(map["a"], Value::Int(2));
        assert_eq!(map["b"], Value::Int(3));
    }

    #[test]
    fn test_remove_by_value() {
        let mut props = Properties::new();
        append(&mut props, &path("ids"), Value::Int(1)).unwrap();
        append(&mut props, &path("ids"), Value::Int(2)).unwrap();
        remove(&mut props, &path("ids"), Some(Value::Int(1))).unwrap();
        let list = get(&props, &path("ids")).unwrap().unwrap().as_list().unwrap();
        assert_eq!(list, &vec![Value::Int(2)]);

        // removing an absent value is an error
        assert!(remove(&mut props, &path("ids"), Some(Value::Int(9))).is_err());
    }

    #[test]
    fn test_remove_by_value_on_scalar_fails() {
        let mut props = Properties::new();
        set(&mut props, &path("a"), Value::Int(1)).unwrap();
        assert!(remove(&mut props, &path("a"), Some(Value::Int(1))).is_err());
    }

    #[test]
    fn test_remove_path_itself() {
        let mut props = Properties::new();
        set(&mut props, &path("a.b"), Value::Int(1)).unwrap();
        remove(&mut props, &path("a.b"), None).unwrap();
        assert_eq!(get(&props, &path("a.b")).unwrap(), None);
        assert!(matches!(get(&props, &path("a")).unwrap(), Some(Value::Map(_))));
    }

    #[test]
    fn test_index_out_of_bounds() {
        let mut props = Properties::new();
        set(&mut props, &path("l"), Value::List(vec![Value::Int(0)])).unwrap();
        assert!(set(&mut props, &path("l[3]"), Value::Int(1)).is_err());
        set(&mut props, &path("l[0]"), Value::Int(5)).unwrap();
        assert_eq!(
            get(&props, &path("l[0]")).unwrap(),
            Some(&Value::Int(5))
        );
    }
}
