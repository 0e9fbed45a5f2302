//! Decision records
//!
//! An append-only log of what the solver did (or failed to do). Validation
//! failures are recorded here rather than aborting the solve; the driver
//! inspects the log afterwards to surface user-visible errors.

use weft_construct::{ResourceId, SimpleEdge, Value};

use crate::constraints::Constraint;

/// How a configuration change was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureAction {
    Set,
    Add,
    Remove,
}

impl std::fmt::Display for ConfigureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfigureAction::Set => "set",
            ConfigureAction::Add => "add",
            ConfigureAction::Remove => "remove",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Generic solver event, tagged with the attribution stack in effect.
    Solve { message: String },

    /// The final value of a property was validated against its template.
    PropertyValidation {
        resource: ResourceId,
        property: String,
        value: Value,
        error: Option<String>,
    },

    /// A field was written through `configure_resource`.
    Configuration {
        resource: ResourceId,
        field: String,
        action: ConfigureAction,
        value: Value,
    },

    /// A logical edge was (or failed to be) expanded for a classification.
    Expansion {
        edge: SimpleEdge,
        classification: String,
        chosen_path: Vec<ResourceId>,
        error: Option<String>,
    },

    /// A constraint was applied or rejected.
    Constraint {
        constraint: Constraint,
        applied: bool,
        error: Option<String>,
    },
}

/// One log entry: the decision plus the `(key, value)` attribution tags that
/// were in scope when it was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub tags: Vec<(String, String)>,
    pub decision: Decision,
}

impl DecisionRecord {
    pub fn error(&self) -> Option<&str> {
        match &self.decision {
            Decision::PropertyValidation { error, .. }
            | Decision::Expansion { error, .. }
            | Decision::Constraint { error, .. } => error.as_deref(),
            _ => None,
        }
    }
}
