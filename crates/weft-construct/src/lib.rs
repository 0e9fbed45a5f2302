//! Resource and property-tree model for the weft engine.
//!
//! This crate owns the data shapes everything else operates on: resource
//! identities, the tagged value tree attached to each resource, navigable
//! property paths, and the directed resource graph with its two views'
//! shared storage.

pub mod error;
pub mod graph;
pub mod id;
pub mod path;
pub mod resource;
pub mod value;

pub use error::{Error, PathError, PathOp, Result};
pub use graph::{EdgeData, ResourceGraph, WalkControl};
pub use id::{PropertyRef, ResourceId, SimpleEdge};
pub use path::{PathSegment, PropertyPath};
pub use resource::{Properties, Resource, Walk};
pub use value::{Value, ValueSet};
