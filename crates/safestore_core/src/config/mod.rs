//! Database and operation configuration values.
//!
//! # Responsibility
//! - Identify a logical database ([`DatabaseConfig`]) and fingerprint it.
//! - Carry per-operation scheduling and query settings.
//!
//! # Invariants
//! - A configuration only changes through its builder methods.
//! - Executors read operation configs once, when the operation is prepared.

mod database;
mod operation;

pub use database::{
    ConfigKey, DatabaseConfig, PrintType, SearchPathDirectory, StoreKind,
    OPTION_BUSY_TIMEOUT_MS, OPTION_INFER_MAPPING_AUTOMATICALLY, OPTION_JOURNAL_MODE,
    OPTION_MIGRATE_AUTOMATICALLY,
};
pub use operation::{
    Concurrency, CreateConfig, FetchConfig, OutputThread, QueuePriority, RemoveConfig,
};
