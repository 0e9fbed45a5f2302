//! Test harness for end-to-end solver runs.
//!
//! Assembles a knowledge base and an initial graph in code, runs the
//! engine, and exposes assertion helpers over the solved graph and the
//! decision log.

use weft_construct::{PropertyPath, Resource, ResourceId, SimpleEdge, Value};
use weft_engine::{Constraint, Decision, Engine, SolveOutcome, SolveRequest};
use weft_kb::KnowledgeBase;

pub struct TestHarness {
    engine: Engine,
    request: SolveRequest,
}

impl TestHarness {
    pub fn new(kb: KnowledgeBase) -> Self {
        init_tracing();
        Self {
            engine: Engine::new(kb),
            request: SolveRequest::default(),
        }
    }

    pub fn with_resource(mut self, id: &str) -> Self {
        self.request.resources.push(Resource::new(parse_id(id)));
        self
    }

    pub fn with_imported_resource(mut self, id: &str) -> Self {
        self.request.resources.push(Resource::imported(parse_id(id)));
        self
    }

    pub fn with_property(mut self, id: &str, path: &str, value: Value) -> Self {
        let id = parse_id(id);
        let path: PropertyPath = path.parse().expect("valid property path");
        let resource = self
            .request
            .resources
            .iter_mut()
            .find(|r| r.id == id)
            .expect("resource added before property");
        resource.set_property(&path, value).expect("property set");
        self
    }

    pub fn with_edge(mut self, edge: &str) -> Self {
        self.request
            .edges
            .push(edge.parse::<SimpleEdge>().expect("valid edge"));
        self
    }

    /// Add a constraint from its document form.
    pub fn with_constraint(mut self, doc: serde_json::Value) -> Self {
        let constraint: Constraint =
            serde_json::from_value(doc).expect("valid constraint document");
        self.request.constraints.push(constraint);
        self
    }

    pub fn solve(&self) -> SolveOutcome {
        self.engine
            .solve(self.request.clone())
            .expect("solve should not fail fatally")
    }

    pub fn solve_err(&self) -> weft_engine::Error {
        match self.engine.solve(self.request.clone()) {
            Ok(outcome) => panic!(
                "expected a fatal solve error, got outcome with {} errors",
                outcome.errors.len()
            ),
            Err(e) => e,
        }
    }
}

pub fn parse_id(s: &str) -> ResourceId {
    s.parse().expect("valid resource id")
}

/// Read a property off the solved graph; panics with context on failure.
pub fn property(outcome: &SolveOutcome, id: &str, path: &str) -> Option<Value> {
    let id = parse_id(id);
    let path: PropertyPath = path.parse().expect("valid property path");
    outcome
        .solution
        .graph()
        .get(&id)
        .unwrap_or_else(|| panic!("resource {id} not in solved graph"))
        .get_property(&path)
        .expect("property path navigates")
        .cloned()
}

/// All validation decisions for a property, in recorded order.
pub fn validations<'a>(
    outcome: &'a SolveOutcome,
    id: &str,
    property_name: &str,
) -> Vec<&'a Decision> {
    let id = parse_id(id);
    outcome
        .solution
        .decisions()
        .iter()
        .filter_map(|record| match &record.decision {
            d @ Decision::PropertyValidation {
                resource, property, ..
            } if resource == &id && property == property_name => Some(d),
            _ => None,
        })
        .collect()
}

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
