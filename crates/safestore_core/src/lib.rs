//! Core of SafeStore: a convenience layer over an embedded object store.
//!
//! A [`SafeStore`] is opened for one [`DatabaseConfig`]. Every create, fetch
//! and remove runs in a fresh [`ChildContext`] whose saves propagate to the
//! long-lived [`SharedContext`] of that configuration. Operations are plain
//! values ([`Operation`]) consumed blocking, with a callback, as a future or
//! as a stream.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod model;
pub mod operation;
pub mod service;
pub mod store;

pub use config::{
    Concurrency, ConfigKey, CreateConfig, DatabaseConfig, FetchConfig, OutputThread, PrintType,
    QueuePriority, RemoveConfig, SearchPathDirectory, StoreKind,
};
pub use context::{ChildContext, ContextRegistry, Draft, ManagedObject, ObjectRef, SharedContext};
pub use dispatch::is_main_queue;
pub use error::{ErrorKind, SafeStoreError, SafeStoreResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::{
    AttributeDescription, AttributeType, Bundle, EntityDescription, EntityType, Model, ModelError,
    ObjectId, RelationshipDescription, Value,
};
pub use operation::{Attached, Operation, OperationResult};
pub use service::{CreateRequest, FetchRequest, RemoveRequest, SafeStore};
pub use store::{Predicate, SortDescriptor, StoreError, StoreLocation};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
