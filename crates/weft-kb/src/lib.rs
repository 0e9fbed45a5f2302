//! Knowledge base for the weft engine.
//!
//! Read-only descriptions of how resource types relate: resource and edge
//! templates, property type declarations, classifications, operational
//! rules, and the templated expression language rules are written in.

pub mod classification;
pub mod error;
pub mod expr;
pub mod kb;
pub mod layers;
pub mod property;
pub mod rule;
pub mod template;

pub use classification::{Classification, Functionality, Gives};
pub use error::{Error, Result};
pub use expr::{DepCapture, DynamicContext, DynamicData};
pub use kb::KnowledgeBase;
pub use layers::DependencyLayer;
pub use property::{Property, PropertyType};
pub use rule::{
    Configuration, ConfigurationRule, Direction, OperationalRule, OperationalStep,
    ResourceSelector,
};
pub use template::{
    ConsumeDeclaration, Consumption, ConsumptionDelay, EdgePathSatisfaction, EdgeTemplate,
    Emission, PathSatisfaction, ResourceTemplate, SatisfactionRoute,
};
