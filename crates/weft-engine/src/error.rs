//! Engine errors
//!
//! Local errors (path, template, expansion) attach to the vertex that hit
//! them and surface as decisions; fatal errors (group failure, circular
//! dependency, constraint conflicts) abort or fail the solve.

use thiserror::Error;

use weft_construct::{ResourceId, SimpleEdge};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Construct(#[from] weft_construct::Error),

    #[error(transparent)]
    Path(#[from] weft_construct::PathError),

    #[error(transparent)]
    Template(#[from] weft_kb::Error),

    #[error("could not expand {edge} <{classification}>: {message}")]
    Expansion {
        edge: SimpleEdge,
        classification: String,
        message: String,
    },

    #[error("operational resource '{0}' missing when required")]
    OperationalResourceMissing(ResourceId),

    #[error("cannot set field {field} on imported resource {resource}")]
    ImportedResource { resource: ResourceId, field: String },

    #[error("constraint conflict: {0}")]
    Constraint(String),

    #[error(
        "possible circular dependency detected in properties graph: {} remaining", stuck.len()
    )]
    CircularDependency {
        /// Stuck keys with their remaining predecessors, for diagnostics.
        stuck: Vec<(String, Vec<String>)>,
    },

    #[error("failed to evaluate group {group}: {}", messages.join("; "))]
    Group { group: usize, messages: Vec<String> },

    #[error("failed to evaluate {key}: {message}")]
    Vertex { key: String, message: String },
}

impl Error {
    /// True when the underlying cause is only that a templated field has not
    /// resolved yet.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Error::Template(e) if e.is_unresolved())
    }
}
