//! SQLite-backed object store.
//!
//! # Responsibility
//! - Attach a store (file, in-memory, binary snapshot) for a validated model.
//! - Keep the relational schema in step with the model.
//! - Provide row-level primitives used by the shared context.
//!
//! # Invariants
//! - Every root entity owns one table; sub-entities share it, tagged by `_ent`.
//! - Store bookkeeping never uses names a model may declare (`_` prefix).
//! - Schema changes are applied in one transaction or not at all.

mod open;
mod predicate;
mod schema;
pub(crate) mod sql;

pub(crate) use open::{attach, AttachedStore};
pub use open::StoreLocation;
pub(crate) use predicate::order_by;
pub use predicate::{Predicate, SortDescriptor};

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Detail error raised by the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store schema version {store_version} is newer than model version {model_version}")]
    UnsupportedSchemaVersion {
        store_version: u32,
        model_version: u32,
    },
    #[error("store needs migration but automatic migration is disabled: {0}")]
    MigrationRequired(String),
    #[error("invalid predicate: {0}")]
    Predicate(String),
    #[error("invalid sort descriptor: {0}")]
    Sort(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("`{entity}` has no key `{key}`")]
    UnknownKey { entity: String, key: String },
    #[error("store kind `{0}` cannot be attached")]
    UnsupportedStoreKind(String),
    #[error("store file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

/// Row identity inside one store: root table plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RowKey {
    pub root: String,
    pub pk: i64,
}

impl RowKey {
    pub fn new(root: impl Into<String>, pk: i64) -> Self {
        Self {
            root: root.into(),
            pk,
        }
    }
}
