//! The operational evaluation engine.
//!
//! Compiles an intent (initial resources plus declarative constraints)
//! into a fully specified, operationally valid resource graph, driven by a
//! knowledge base of resource and edge templates. The evaluator turns the
//! initial graph into the final graph by evaluating vertices (properties,
//! edges, path expansions, resource rules) in dependency order, discovering
//! new work as it goes.

pub mod constraints;
pub mod decisions;
pub mod engine;
pub mod error;
pub mod eval;
pub mod expand;
pub mod reconciler;
pub mod rule;
pub mod solution;

pub use constraints::{
    ApplicationConstraint, Constraint, ConstraintList, ConstraintOperator, ConstructConstraint,
    EdgeConstraint, ResourceConstraint,
};
pub use decisions::{ConfigureAction, Decision, DecisionRecord};
pub use engine::{Engine, SolveOutcome, SolveRequest};
pub use error::{Error, Result};
pub use eval::{Evaluator, Key, ReadyPriority};
pub use solution::{OpEvent, SolutionContext};
