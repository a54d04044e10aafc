//! Error taxonomy surfaced by every operation adapter.
//!
//! # Responsibility
//! - Define the closed set of caller-visible failure kinds.
//! - Keep store/model detail errors attached as sources where a kind wraps them.
//!
//! # Invariants
//! - Every adapter (blocking, callback, future, stream) reports the same
//!   `ErrorKind` for the same underlying fault.
//! - No failure is swallowed by the core; all of them travel through the
//!   operation's result channel.

use crate::store::StoreError;
use thiserror::Error;

pub type SafeStoreResult<T> = Result<T, SafeStoreError>;

/// Caller-visible failure of a store operation.
#[derive(Debug, Error)]
pub enum SafeStoreError {
    /// The data model could not be located or loaded.
    #[error("data model could not be located or loaded")]
    NoDataBaseModel,
    /// The object's owning context is no longer available.
    #[error("object does not belong to a live context")]
    FailGetContext,
    /// Query execution failed.
    #[error("fetch failed: {message}")]
    FailFetchComponent { message: String },
    /// The requested entity type is not part of the data model.
    #[error("entity could not be instantiated from the data model")]
    FailCreate,
    /// Committing pending changes failed.
    #[error("save failed: {0}")]
    FailSave(#[source] StoreError),
    /// Reserved; no operation raises it.
    #[error("object already exists in the database")]
    ObjectInDatabaseIs,
    /// Batch delete did not produce the deleted identifiers.
    #[error("batch delete failed")]
    FailRemove,
}

/// Payload-free mirror of [`SafeStoreError`] for comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoDataBaseModel,
    FailGetContext,
    FailFetchComponent,
    FailCreate,
    FailSave,
    ObjectInDatabaseIs,
    FailRemove,
}

impl SafeStoreError {
    /// Returns the kind of this error without its payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoDataBaseModel => ErrorKind::NoDataBaseModel,
            Self::FailGetContext => ErrorKind::FailGetContext,
            Self::FailFetchComponent { .. } => ErrorKind::FailFetchComponent,
            Self::FailCreate => ErrorKind::FailCreate,
            Self::FailSave(_) => ErrorKind::FailSave,
            Self::ObjectInDatabaseIs => ErrorKind::ObjectInDatabaseIs,
            Self::FailRemove => ErrorKind::FailRemove,
        }
    }

    pub(crate) fn fetch(err: impl std::fmt::Display) -> Self {
        Self::FailFetchComponent {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, SafeStoreError};
    use crate::store::StoreError;

    #[test]
    fn kind_strips_payloads() {
        let fetch = SafeStoreError::fetch("no such column");
        assert_eq!(fetch.kind(), ErrorKind::FailFetchComponent);
        assert!(fetch.to_string().contains("no such column"));

        let save = SafeStoreError::FailSave(StoreError::InvalidData("broken".to_string()));
        assert_eq!(save.kind(), ErrorKind::FailSave);
        assert!(std::error::Error::source(&save).is_some());
    }
}
