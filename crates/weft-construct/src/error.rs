//! Construct-level errors

use thiserror::Error;

use crate::id::{ResourceId, SimpleEdge};

pub type Result<T> = std::result::Result<T, Error>;

/// The property-path operation that produced a [`PathError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOp {
    Parse,
    Get,
    Set,
    Append,
    Remove,
}

impl std::fmt::Display for PathOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PathOp::Parse => "Parse",
            PathOp::Get => "Get",
            PathOp::Set => "Set",
            PathOp::Append => "Append",
            PathOp::Remove => "Remove",
        };
        f.write_str(s)
    }
}

/// A failure navigating or mutating a property tree, annotated with the path
/// text and the operation that was running.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("error in path '{path}' during '{op}': {cause}")]
pub struct PathError {
    pub path: String,
    pub op: PathOp,
    pub cause: String,
}

impl PathError {
    pub fn new(path: impl Into<String>, op: PathOp, cause: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op,
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid resource id '{0}'")]
    InvalidResourceId(String),

    #[error("invalid property ref '{0}' (expected 'resource#property')")]
    InvalidPropertyRef(String),

    #[error("invalid edge '{0}' (expected 'source -> target')")]
    InvalidEdge(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("resource already exists: {0}")]
    ResourceAlreadyExists(ResourceId),

    #[error("edge not found: {0}")]
    EdgeNotFound(SimpleEdge),

    #[error("cycle detected in resource graph involving: {0:?}")]
    Cycle(Vec<ResourceId>),
}
