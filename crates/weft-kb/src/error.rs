//! Knowledge-base errors

use thiserror::Error;

use weft_construct::{PropertyRef, ResourceId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("no resource template for {0}")]
    TemplateNotFound(String),

    #[error("no property '{property}' on template {template}")]
    PropertyNotFound { template: String, property: String },

    #[error("invalid property type '{0}'")]
    InvalidPropertyType(String),

    #[error("could not parse template '{template}': {message}")]
    TemplateParse { template: String, message: String },

    #[error("could not evaluate template '{template}': {message}")]
    TemplateEval { template: String, message: String },

    #[error("unknown template function '{0}'")]
    UnknownFunction(String),

    #[error("unresolved field {0}")]
    UnresolvedField(PropertyRef),

    #[error("value {value} is not valid for {resource}#{property}: {message}")]
    Validation {
        resource: ResourceId,
        property: String,
        value: String,
        message: String,
    },

    #[error(transparent)]
    Construct(#[from] weft_construct::Error),

    #[error(transparent)]
    Path(#[from] weft_construct::PathError),
}

impl Error {
    /// True when evaluation failed only because a field has not resolved
    /// yet; callers treat this as "defer", not "fail".
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Error::UnresolvedField(_))
    }
}
