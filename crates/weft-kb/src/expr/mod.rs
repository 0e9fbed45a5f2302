//! The templated expression language
//!
//! Knowledge-base documents embed `{{ … }}` expressions in strings: default
//! values, rule conditions, configuration targets, selector predicates.
//! Evaluation runs against the current solution through a
//! [`DynamicContext`], which also supports *dependency capture*: executing a
//! template not to apply it, but to record every field the template reads so
//! the evaluator can turn those reads into work-graph edges.

pub mod lexer;
pub mod parser;

use std::cell::RefCell;

use indexmap::IndexSet;
use tracing::trace;

use weft_construct::{
    PropertyPath, PropertyRef, ResourceGraph, ResourceId, SimpleEdge, Value,
};

use crate::error::{Error, Result};
use crate::kb::KnowledgeBase;
use crate::layers::{self, DependencyLayer};
use parser::Expr;

/// Template inputs: the current resource (`.Self`), the current edge
/// (`.Source`/`.Target`), and the current property path (`.Path`).
#[derive(Debug, Clone, Default)]
pub struct DynamicData {
    pub resource: ResourceId,
    pub edge: Option<SimpleEdge>,
    pub path: Option<String>,
}

impl DynamicData {
    pub fn for_resource(resource: ResourceId) -> Self {
        Self {
            resource,
            ..Default::default()
        }
    }

    pub fn for_edge(edge: SimpleEdge) -> Self {
        Self {
            resource: edge.source.clone(),
            edge: Some(edge),
            path: None,
        }
    }

    pub fn with_path(mut self, path: &PropertyPath) -> Self {
        self.path = Some(path.to_string());
        self
    }
}

/// Everything a template read while executing under capture.
#[derive(Debug, Clone, Default)]
pub struct DepCapture {
    pub refs: IndexSet<PropertyRef>,
}

pub struct DynamicContext<'a> {
    pub graph: &'a ResourceGraph,
    pub kb: &'a KnowledgeBase,
    capture: Option<RefCell<DepCapture>>,
}

/// One piece of a templated string: literal text or an expression span.
#[derive(Clone, Copy)]
enum TemplatePart<'s> {
    Text(&'s str),
    Expr(&'s str),
}

fn split_template(template: &str) -> Result<Vec<TemplatePart<'_>>> {
    let mut parts = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            parts.push(TemplatePart::Text(&rest[..open]));
        }
        let after = &rest[open + 2..];
        let close = after.find("}}").ok_or_else(|| Error::TemplateParse {
            template: template.to_string(),
            message: "unclosed '{{'".to_string(),
        })?;
        parts.push(TemplatePart::Expr(after[..close].trim()));
        rest = &after[close + 2..];
    }
    if !rest.is_empty() {
        parts.push(TemplatePart::Text(rest));
    }
    Ok(parts)
}

impl<'a> DynamicContext<'a> {
    pub fn new(graph: &'a ResourceGraph, kb: &'a KnowledgeBase) -> Self {
        Self {
            graph,
            kb,
            capture: None,
        }
    }

    /// A context that records every field read instead of failing on
    /// unresolved fields.
    pub fn capturing(graph: &'a ResourceGraph, kb: &'a KnowledgeBase) -> Self {
        Self {
            graph,
            kb,
            capture: Some(RefCell::new(DepCapture::default())),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn captured(&self) -> DepCapture {
        self.capture
            .as_ref()
            .map(|c| c.borrow().clone())
            .unwrap_or_default()
    }

    fn record_ref(&self, r: PropertyRef) {
        if let Some(capture) = &self.capture {
            capture.borrow_mut().refs.insert(r);
        }
    }

    /// Evaluate a templated string. A string that is exactly one `{{ … }}`
    /// span yields the expression's value; mixed text yields a string.
    pub fn execute_value(&self, template: &str, data: &DynamicData) -> Result<Value> {
        let parts = split_template(template)?;
        let eval_err = |message: String| Error::TemplateEval {
            template: template.to_string(),
            message,
        };
        let only_expr = matches!(parts.as_slice(), [TemplatePart::Expr(_)]);
        if only_expr {
            if let TemplatePart::Expr(src) = parts[0] {
                let expr = parser::parse(src).map_err(eval_err)?;
                return self.eval(&expr, data);
            }
        }
        if parts.iter().all(|p| matches!(p, TemplatePart::Text(_))) {
            return Ok(Value::Str(template.to_string()));
        }
        let mut out = String::new();
        for part in parts {
            match part {
                TemplatePart::Text(text) => out.push_str(text),
                TemplatePart::Expr(src) => {
                    let expr = parser::parse(src).map_err(eval_err)?;
                    out.push_str(&self.eval(&expr, data)?.to_string());
                }
            }
        }
        Ok(Value::Str(out))
    }

    pub fn execute_string(&self, template: &str, data: &DynamicData) -> Result<String> {
        Ok(self.execute_value(template, data)?.to_string())
    }

    /// Decode a template to a resource id; plain `provider:type:name` text
    /// works without any `{{ … }}`.
    pub fn execute_id(&self, template: &str, data: &DynamicData) -> Result<ResourceId> {
        let value = self.execute_value(template, data)?;
        match value {
            Value::Id(id) => Ok(id),
            Value::Ref(r) => Ok(r.resource),
            Value::Str(s) => s.parse::<ResourceId>().map_err(Error::from),
            other => Err(Error::TemplateEval {
                template: template.to_string(),
                message: format!("expected resource id, got {}", other.kind()),
            }),
        }
    }

    pub fn execute_bool(&self, template: &str, data: &DynamicData) -> Result<bool> {
        Ok(self.execute_value(template, data)?.is_truthy())
    }

    /// Evaluate an `if` condition: the empty template is vacuously true; an
    /// unresolved field read means "not yet", i.e. false.
    pub fn execute_condition(&self, template: &str, data: &DynamicData) -> Result<bool> {
        if template.trim().is_empty() {
            return Ok(true);
        }
        match self.execute_value(template, data) {
            Ok(v) => Ok(v.is_truthy()),
            Err(e) if e.is_unresolved() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read a property off a resource in the solution, recording the read
    /// when capturing. Unset properties are unresolved, not null: callers
    /// either defer on that error or let capture soften it.
    pub fn field_value(&self, property: &str, resource: &ResourceId) -> Result<Value> {
        let r = PropertyRef {
            resource: resource.clone(),
            property: property.to_string(),
        };
        self.record_ref(r.clone());
        let res = self
            .graph
            .get(resource)
            .ok_or_else(|| Error::UnresolvedField(r.clone()))?;
        let path = PropertyPath::parse(property)?;
        match res.get_property(&path)? {
            Some(v) if !v.is_null() => Ok(v.clone()),
            _ => Err(Error::UnresolvedField(r)),
        }
    }

    fn eval(&self, expr: &Expr, data: &DynamicData) -> Result<Value> {
        match expr {
            Expr::Lit(v) => Ok(v.clone()),
            Expr::Ref(parts) => self.eval_ref(parts, data),
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, data)?);
                }
                match self.call(name, &values, data) {
                    Ok(v) => Ok(v),
                    // under capture, resolution failures soften to null so
                    // the rest of the template still records its reads
                    Err(e) if self.is_capturing() && e.is_unresolved() => {
                        trace!(function = name, "softened unresolved read during capture");
                        Ok(Value::Null)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn eval_ref(&self, parts: &[String], data: &DynamicData) -> Result<Value> {
        let err = |message: String| Error::TemplateEval {
            template: format!(".{}", parts.join(".")),
            message,
        };
        let base = match parts.first().map(String::as_str) {
            Some("Self") => Value::Id(data.resource.clone()),
            Some("Source") => match &data.edge {
                Some(edge) => Value::Id(edge.source.clone()),
                None => return Err(err("no edge in scope for .Source".into())),
            },
            Some("Target") => match &data.edge {
                Some(edge) => Value::Id(edge.target.clone()),
                None => return Err(err("no edge in scope for .Target".into())),
            },
            Some("Path") => match &data.path {
                Some(path) => return Ok(Value::Str(path.clone())),
                None => return Err(err("no property path in scope for .Path".into())),
            },
            Some(other) => return Err(err(format!("unknown reference '.{other}'"))),
            None => return Err(err("empty reference".into())),
        };
        match parts.get(1).map(String::as_str) {
            None => Ok(base),
            Some(field) => {
                let id = base.as_id().cloned().unwrap_or_default();
                match field {
                    "Provider" => Ok(Value::Str(id.provider)),
                    "Type" => Ok(Value::Str(id.r#type)),
                    "Namespace" => Ok(Value::Str(id.namespace)),
                    "Name" => Ok(Value::Str(id.name)),
                    other => Err(err(format!("unknown id field '.{other}'"))),
                }
            }
        }
    }

    fn call(&self, name: &str, args: &[Value], data: &DynamicData) -> Result<Value> {
        let err = |message: String| Error::TemplateEval {
            template: name.to_string(),
            message,
        };
        let arg = |i: usize| -> Result<&Value> {
            args.get(i)
                .ok_or_else(|| err(format!("missing argument {i}")))
        };
        let id_arg = |i: usize| -> Result<ResourceId> {
            match arg(i)? {
                Value::Id(id) => Ok(id.clone()),
                Value::Str(s) => s.parse().map_err(Error::from),
                other => Err(err(format!("argument {i}: expected id, got {}", other.kind()))),
            }
        };
        let str_arg = |i: usize| -> Result<String> {
            match arg(i)? {
                Value::Str(s) => Ok(s.clone()),
                other => Ok(other.to_string()),
            }
        };
        let list_arg = |i: usize| -> Result<Vec<Value>> {
            match arg(i)? {
                Value::List(items) => Ok(items.clone()),
                Value::Set(set) => Ok(set.to_vec()),
                Value::Null => Ok(Vec::new()),
                other => Err(err(format!(
                    "argument {i}: expected list, got {}",
                    other.kind()
                ))),
            }
        };

        match name {
            "field_value" => {
                let field = str_arg(0)?;
                let id = id_arg(1)?;
                self.field_value(&field, &id)
            }
            "field_ref" => {
                let field = str_arg(0)?;
                let id = id_arg(1)?;
                let r = PropertyRef::new(id, field);
                self.record_ref(r.clone());
                Ok(Value::Ref(r))
            }
            "upstream" | "downstream" => {
                let filter = id_arg(0)?;
                let from = id_arg(1)?;
                let layer = DependencyLayer::FirstFunctional;
                let candidates = if name == "upstream" {
                    layers::upstream(self.graph, self.kb, &from, layer)
                } else {
                    layers::downstream(self.graph, self.kb, &from, layer)
                };
                candidates
                    .into_iter()
                    .find(|c| filter.matches(c))
                    .map(Value::Id)
                    .ok_or_else(|| {
                        Error::UnresolvedField(PropertyRef::new(from, format!("<{name} {filter}>")))
                    })
            }
            "all_upstream" | "all_downstream" => {
                let filter = id_arg(0)?;
                let from = id_arg(1)?;
                let layer = DependencyLayer::All;
                let candidates = if name == "all_upstream" {
                    layers::upstream(self.graph, self.kb, &from, layer)
                } else {
                    layers::downstream(self.graph, self.kb, &from, layer)
                };
                Ok(Value::List(
                    candidates
                        .into_iter()
                        .filter(|c| filter.matches(c))
                        .map(Value::Id)
                        .collect(),
                ))
            }
            "shortest_path" => {
                let src = id_arg(0)?;
                let tgt = id_arg(1)?;
                let path = self
                    .graph
                    .shortest_path(&src, &tgt)
                    .ok_or_else(|| err(format!("no path from {src} to {tgt}")))?;
                Ok(Value::List(path.into_iter().map(Value::Id).collect()))
            }
            "to_json" => {
                let json = serde_json::to_string(&arg(0)?.to_json())
                    .map_err(|e| err(e.to_string()))?;
                Ok(Value::Str(json))
            }
            "filter_ids" => {
                let filter = id_arg(0)?;
                let items = list_arg(1)?;
                Ok(Value::List(
                    items
                        .into_iter()
                        .filter(|v| v.as_id().map(|id| filter.matches(id)).unwrap_or(false))
                        .collect(),
                ))
            }
            "filter_match" => {
                let filter = id_arg(0)?;
                let items = list_arg(1)?;
                Ok(Value::Bool(items.iter().any(|v| {
                    v.as_id().map(|id| filter.matches(id)).unwrap_or(false)
                })))
            }
            "zip_to_map" => {
                let keys = list_arg(0)?;
                let values = list_arg(1)?;
                if keys.len() != values.len() {
                    return Err(err(format!(
                        "length mismatch: {} keys, {} values",
                        keys.len(),
                        values.len()
                    )));
                }
                Ok(Value::Map(
                    keys.into_iter()
                        .map(|k| k.to_string())
                        .zip(values)
                        .collect(),
                ))
            }
            "keys_to_map_with_default" => {
                let default = arg(0)?.clone();
                let keys = list_arg(1)?;
                Ok(Value::Map(
                    keys.into_iter()
                        .map(|k| (k.to_string(), default.clone()))
                        .collect(),
                ))
            }
            "replace" => {
                let old = str_arg(0)?;
                let new = str_arg(1)?;
                let s = str_arg(2)?;
                Ok(Value::Str(s.replace(&old, &new)))
            }
            "split" => {
                let sep = str_arg(0)?;
                let s = str_arg(1)?;
                Ok(Value::List(
                    s.split(&sep).map(|p| Value::Str(p.to_string())).collect(),
                ))
            }
            "join" => {
                let sep = str_arg(0)?;
                let items = list_arg(1)?;
                Ok(Value::Str(
                    items
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(&sep),
                ))
            }
            "basename" => {
                let s = str_arg(0)?;
                Ok(Value::Str(
                    s.rsplit('/').next().unwrap_or_default().to_string(),
                ))
            }
            "add" => {
                let mut sum = 0i64;
                for (i, _) in args.iter().enumerate() {
                    sum += arg(i)?.as_int().ok_or_else(|| {
                        err(format!("argument {i}: expected int"))
                    })?;
                }
                Ok(Value::Int(sum))
            }
            "sub" => {
                let first = arg(0)?
                    .as_int()
                    .ok_or_else(|| err("argument 0: expected int".into()))?;
                let mut result = first;
                for (i, _) in args.iter().enumerate().skip(1) {
                    result -= arg(i)?.as_int().ok_or_else(|| {
                        err(format!("argument {i}: expected int"))
                    })?;
                }
                Ok(Value::Int(result))
            }
            other => Err(Error::UnknownFunction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_construct::Resource;

    fn setup() -> (ResourceGraph, KnowledgeBase) {
        let mut graph = ResourceGraph::new();
        let mut res = Resource::new("p:t:a".parse().unwrap());
        res.properties
            .insert("Count".into(), Value::Int(3));
        graph.add_resource(res).unwrap();
        (graph, KnowledgeBase::new())
    }

    #[test]
    fn test_plain_text_passthrough() {
        let (graph, kb) = setup();
        let ctx = DynamicContext::new(&graph, &kb);
        let data = DynamicData::for_resource("p:t:a".parse().unwrap());
        assert_eq!(
            ctx.execute_value("hello", &data).unwrap(),
            Value::Str("hello".into())
        );
    }

    #[test]
    fn test_field_value_roundtrip() {
        let (graph, kb) = setup();
        let ctx = DynamicContext::new(&graph, &kb);
        let data = DynamicData::for_resource("p:t:a".parse().unwrap());
        assert_eq!(
            ctx.execute_value(r#"{{ field_value "Count" .Self }}"#, &data)
                .unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_unresolved_field_defers() {
        let (graph, kb) = setup();
        let ctx = DynamicContext::new(&graph, &kb);
        let data = DynamicData::for_resource("p:t:a".parse().unwrap());
        let err = ctx
            .execute_value(r#"{{ field_value "Missing" .Self }}"#, &data)
            .unwrap_err();
        assert!(err.is_unresolved());
    }

    #[test]
    fn test_capture_records_reads() {
        let (graph, kb) = setup();
        let ctx = DynamicContext::capturing(&graph, &kb);
        let data = DynamicData::for_resource("p:t:a".parse().unwrap());
        // missing field softens to null under capture but is still recorded
        let v = ctx
            .execute_value(r#"{{ field_value "Missing" .Self }}"#, &data)
            .unwrap();
        assert_eq!(v, Value::Null);
        let captured = ctx.captured();
        assert!(captured
            .refs
            .iter()
            .any(|r| r.property == "Missing"));
    }

    #[test]
    fn test_interpolation_concatenates() {
        let (graph, kb) = setup();
        let ctx = DynamicContext::new(&graph, &kb);
        let data = DynamicData::for_resource("p:t:a".parse().unwrap());
        assert_eq!(
            ctx.execute_value("{{ .Self.Name }}-suffix", &data).unwrap(),
            Value::Str("a-suffix".into())
        );
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let (graph, kb) = setup();
        let ctx = DynamicContext::new(&graph, &kb);
        let data = DynamicData::for_resource("p:t:a".parse().unwrap());
        assert_eq!(
            ctx.execute_value("{{ add 1 2 3 }}", &data).unwrap(),
            Value::Int(6)
        );
        assert_eq!(
            ctx.execute_value(r#"{{ join "," (split "/" "a/b") }}"#, &data)
                .unwrap(),
            Value::Str("a,b".into())
        );
        assert_eq!(
            ctx.execute_value(r#"{{ basename "x/y/z" }}"#, &data).unwrap(),
            Value::Str("z".into())
        );
    }
}
