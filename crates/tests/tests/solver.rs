//! End-to-end solver scenarios.
//!
//! Each test assembles a small knowledge base, seeds an initial graph and
//! constraints, runs the solver to completion, and checks the solved graph
//! plus the decision log.

use weft_construct::Value;
use weft_engine::Decision;
use weft_kb::{
    Direction, EdgeTemplate, KnowledgeBase, OperationalRule, OperationalStep, PathSatisfaction,
    Property, ResourceSelector, ResourceTemplate, SatisfactionRoute,
};
use weft_tests::{parse_id, property, validations, TestHarness};

fn edge_template(src: &str, tgt: &str) -> EdgeTemplate {
    EdgeTemplate {
        source: src.parse().unwrap(),
        target: tgt.parse().unwrap(),
        ..Default::default()
    }
}

fn int_property(default: Option<i64>) -> Property {
    Property {
        type_spec: "int".into(),
        default_value: default.map(Value::Int),
        ..Default::default()
    }
}

/// KB: resource template `p:t` has property `count` of type `int` with
/// default `3`.
fn kb_with_default_count() -> KnowledgeBase {
    let mut kb = KnowledgeBase::new();
    let mut t = ResourceTemplate::new("p:t");
    t.properties.insert("count".into(), int_property(Some(3)));
    kb.add_resource_template(t);
    kb
}

#[test]
fn test_single_property_default() {
    let outcome = TestHarness::new(kb_with_default_count())
        .with_resource("p:t:a")
        .solve();

    assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
    assert_eq!(property(&outcome, "p:t:a", "count"), Some(Value::Int(3)));

    let validation = validations(&outcome, "p:t:a", "count");
    assert_eq!(validation.len(), 1);
    assert!(matches!(
        validation[0],
        Decision::PropertyValidation { error: None, .. }
    ));
}

#[test]
fn test_equals_constraint_overrides_default() {
    let outcome = TestHarness::new(kb_with_default_count())
        .with_resource("p:t:a")
        .with_constraint(serde_json::json!({
            "scope": "resource",
            "operator": "equals",
            "target": "p:t:a",
            "property": "count",
            "value": 7,
        }))
        .solve();

    assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
    assert_eq!(property(&outcome, "p:t:a", "count"), Some(Value::Int(7)));
}

/// KB: `compute:c` has property `network` of type `resource(net:n)` with an
/// operational step requiring 1 upstream `net:n`.
fn kb_compute_needs_network() -> KnowledgeBase {
    let mut kb = KnowledgeBase::new();
    let mut compute = ResourceTemplate::new("compute:c");
    compute.classification.is = vec!["compute".into()];
    compute.properties.insert(
        "network".into(),
        Property {
            type_spec: "resource(net:n)".into(),
            operational_rule: Some(OperationalRule {
                step: Some(OperationalStep {
                    direction: Direction::Upstream,
                    resources: vec![ResourceSelector {
                        selector: "net:n".into(),
                        ..Default::default()
                    }],
                    num_needed: 1,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    kb.add_resource_template(compute);
    kb.add_resource_template(ResourceTemplate::new("net:n"));
    kb.add_edge_template(edge_template("net:n", "compute:c"));
    kb
}

#[test]
fn test_operational_step_creates_intermediate() {
    let outcome = TestHarness::new(kb_compute_needs_network())
        .with_resource("compute:c:main")
        .solve();

    assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
    let created = parse_id("net:n:main-network");
    assert!(outcome.solution.graph().contains(&created));
    assert_eq!(
        property(&outcome, "compute:c:main", "network"),
        Some(Value::Id(created.clone()))
    );
    assert!(outcome
        .solution
        .graph()
        .has_edge(&created, &parse_id("compute:c:main")));
}

/// KB: a direct edge from `api:g` to `compute:c` requires classification
/// `permissions`, satisfied by inserting `auth:r` between them.
fn kb_api_requires_permissions() -> KnowledgeBase {
    let mut kb = KnowledgeBase::new();
    let mut api = ResourceTemplate::new("api:g");
    api.classification.is = vec!["api".into()];
    api.path_satisfaction = PathSatisfaction {
        as_source: vec![SatisfactionRoute {
            classification: "permissions".into(),
            property_reference: String::new(),
        }],
        as_target: vec![],
    };
    kb.add_resource_template(api);

    let mut auth = ResourceTemplate::new("auth:r");
    auth.classification.is = vec!["permissions".into()];
    kb.add_resource_template(auth);

    let mut compute = ResourceTemplate::new("compute:c");
    compute.classification.is = vec!["compute".into()];
    kb.add_resource_template(compute);

    kb.add_edge_template(edge_template("api:g", "auth:r"));
    kb.add_edge_template(edge_template("auth:r", "compute:c"));
    kb
}

#[test]
fn test_path_expansion_via_classification() {
    let outcome = TestHarness::new(kb_api_requires_permissions())
        .with_resource("api:g:x")
        .with_resource("compute:c:y")
        .with_edge("api:g:x -> compute:c:y")
        .solve();

    assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
    let auth = parse_id("auth:r:x-r-y");
    assert!(outcome.solution.graph().contains(&auth));
    assert!(outcome.solution.graph().has_edge(&parse_id("api:g:x"), &auth));
    assert!(outcome
        .solution
        .graph()
        .has_edge(&auth, &parse_id("compute:c:y")));
    // the placeholder direct edge is gone
    assert!(!outcome
        .solution
        .graph()
        .has_edge(&parse_id("api:g:x"), &parse_id("compute:c:y")));

    let chosen = outcome
        .solution
        .decisions()
        .iter()
        .find_map(|r| match &r.decision {
            Decision::Expansion {
                classification,
                chosen_path,
                error: None,
                ..
            } if classification == "permissions" => Some(chosen_path.clone()),
            _ => None,
        })
        .expect("expansion decision recorded");
    assert_eq!(
        chosen,
        vec![parse_id("api:g:x"), auth, parse_id("compute:c:y")]
    );
}

/// KB: `s:l` has `ids: list(resource)`; two edge templates each carry a
/// configuration rule appending the same id.
fn kb_two_edges_append_same_id() -> KnowledgeBase {
    let mut kb = KnowledgeBase::new();
    let mut list_holder = ResourceTemplate::new("s:l");
    list_holder.properties.insert(
        "ids".into(),
        Property {
            type_spec: "list(resource)".into(),
            ..Default::default()
        },
    );
    kb.add_resource_template(list_holder);
    kb.add_resource_template(ResourceTemplate::new("p:b"));
    kb.add_resource_template(ResourceTemplate::new("p:c"));
    kb.add_resource_template(ResourceTemplate::new("q:r"));

    for src in ["p:b", "p:c"] {
        let mut template = edge_template(src, "s:l");
        template.operational_rules = vec![OperationalRule {
            configuration_rules: vec![weft_kb::ConfigurationRule {
                resource: "{{ .Target }}".into(),
                config: weft_kb::Configuration {
                    field: "ids".into(),
                    value: Value::Str("q:r:1".into()),
                },
            }],
            ..Default::default()
        }];
        kb.add_edge_template(template);
    }
    kb
}

#[test]
fn test_list_append_deduplicates() {
    let outcome = TestHarness::new(kb_two_edges_append_same_id())
        .with_resource("s:l:a")
        .with_property("s:l:a", "ids", Value::List(vec![Value::Id(parse_id("q:r:1"))]))
        .with_resource("p:b:b")
        .with_resource("p:c:c")
        .with_edge("p:b:b -> s:l:a")
        .with_edge("p:c:c -> s:l:a")
        .solve();

    assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
    let ids = property(&outcome, "s:l:a", "ids").expect("ids set");
    assert_eq!(
        ids,
        Value::List(vec![Value::Id(parse_id("q:r:1"))]),
        "appends of an already-present id must not duplicate it"
    );
}

/// KB: `k:child.parent` is `resource(k:parent)` with `namespace: true`.
fn kb_namespaced_child() -> KnowledgeBase {
    let mut kb = KnowledgeBase::new();
    let mut child = ResourceTemplate::new("k:child");
    child.properties.insert(
        "parent".into(),
        Property {
            type_spec: "resource(k:parent)".into(),
            namespace: true,
            operational_rule: Some(OperationalRule {
                step: Some(OperationalStep {
                    direction: Direction::Downstream,
                    resources: vec![ResourceSelector {
                        selector: "k:parent".into(),
                        ..Default::default()
                    }],
                    num_needed: 1,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    kb.add_resource_template(child);
    kb.add_resource_template(ResourceTemplate::new("k:parent"));
    kb.add_edge_template(edge_template("k:child", "k:parent"));
    kb
}

#[test]
fn test_namespace_rewriting() {
    let outcome = TestHarness::new(kb_namespaced_child())
        .with_resource("k:child:c")
        .with_resource("k:parent:p")
        .with_constraint(serde_json::json!({
            "scope": "edge",
            "operator": "must_exist",
            "target": "k:child:c -> k:parent:p",
        }))
        .solve();

    assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
    let renamed = parse_id("k:child:p:c");
    assert!(
        outcome.solution.graph().contains(&renamed),
        "child should have been renamed into the parent namespace"
    );
    assert!(!outcome.solution.graph().contains(&parse_id("k:child:c")));
    assert_eq!(
        property(&outcome, "k:child:p:c", "parent"),
        Some(Value::Id(parse_id("k:parent:p")))
    );
    assert!(outcome
        .solution
        .graph()
        .has_edge(&renamed, &parse_id("k:parent:p")));
}

#[test]
fn test_imported_resource_is_never_configured() {
    let outcome = TestHarness::new(kb_with_default_count())
        .with_imported_resource("p:t:a")
        .solve();

    // the default must not have been applied
    assert_eq!(property(&outcome, "p:t:a", "count"), None);
}

#[test]
fn test_equals_on_imported_resource_is_rejected() {
    let outcome = TestHarness::new(kb_with_default_count())
        .with_imported_resource("p:t:a")
        .with_constraint(serde_json::json!({
            "scope": "resource",
            "operator": "equals",
            "target": "p:t:a",
            "property": "count",
            "value": 7,
        }))
        .solve();

    assert_eq!(property(&outcome, "p:t:a", "count"), None);
    assert!(
        !outcome.errors.is_empty(),
        "rejected constraint should surface as an aggregated error"
    );
}

#[test]
fn test_must_not_exist_edge_removed() {
    let mut kb = KnowledgeBase::new();
    kb.add_resource_template(ResourceTemplate::new("p:a"));
    kb.add_resource_template(ResourceTemplate::new("p:b"));
    kb.add_edge_template(edge_template("p:a", "p:b"));

    let outcome = TestHarness::new(kb)
        .with_resource("p:a:1")
        .with_resource("p:b:1")
        .with_edge("p:a:1 -> p:b:1")
        .with_constraint(serde_json::json!({
            "scope": "edge",
            "operator": "must_not_exist",
            "target": "p:a:1 -> p:b:1",
        }))
        .solve();

    assert!(!outcome
        .solution
        .graph()
        .has_edge(&parse_id("p:a:1"), &parse_id("p:b:1")));
}

#[test]
fn test_application_add_constraint_creates_resource() {
    let outcome = TestHarness::new(kb_with_default_count())
        .with_constraint(serde_json::json!({
            "scope": "application",
            "operator": "add",
            "node": "p:t:fresh",
        }))
        .solve();

    assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
    // the added resource got its templated default
    assert_eq!(property(&outcome, "p:t:fresh", "count"), Some(Value::Int(3)));
}

#[test]
fn test_determinism_across_solves() {
    let build = || {
        TestHarness::new(kb_api_requires_permissions())
            .with_resource("api:g:x")
            .with_resource("compute:c:y")
            .with_edge("api:g:x -> compute:c:y")
    };
    let first = build().solve();
    let second = build().solve();

    assert_eq!(
        first.solution.graph().resource_ids(),
        second.solution.graph().resource_ids()
    );
    assert_eq!(first.solution.graph().edges(), second.solution.graph().edges());
    assert_eq!(first.evaluated_groups, second.evaluated_groups);
    assert_eq!(first.solution.decisions(), second.solution.decisions());
}

#[test]
fn test_group_order_is_recorded() {
    let outcome = TestHarness::new(kb_compute_needs_network())
        .with_resource("compute:c:main")
        .solve();

    // every evaluated key appears in exactly one group
    let mut seen = Vec::new();
    for group in &outcome.evaluated_groups {
        for key in group {
            assert!(!seen.contains(key), "{key} evaluated twice");
            seen.push(key.clone());
        }
    }
    assert!(!seen.is_empty());
}
