//! Data model: entity descriptions, attribute values and bundle lookup.
//!
//! # Responsibility
//! - Describe which entity types a store can persist.
//! - Resolve a model by name (and optional version) from a [`Bundle`].
//!
//! # Invariants
//! - Models handed to the store have passed [`Model::validate`].
//! - Rust types bind to entities by name through [`EntityType`].

mod loader;
mod schema;
mod value;

pub use loader::Bundle;
pub use schema::{
    AttributeDescription, AttributeType, EntityDescription, Model, RelationshipDescription,
};
pub(crate) use schema::{Column, ColumnKind};
pub use value::{ObjectId, Value};

use thiserror::Error;

/// Binds a Rust marker type to an entity of the data model.
///
/// ```
/// use safestore_core::EntityType;
///
/// struct Note;
///
/// impl EntityType for Note {
///     const ENTITY_NAME: &'static str = "Note";
/// }
/// ```
pub trait EntityType: Send + Sync + 'static {
    const ENTITY_NAME: &'static str;
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("failed to read model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse model file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("requested model version {requested}, bundle provides {found}")]
    VersionMismatch { requested: u32, found: u32 },
    #[error("invalid model: {0}")]
    Invalid(String),
}
