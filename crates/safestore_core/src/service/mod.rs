//! Caller-facing store service.
//!
//! # Responsibility
//! - Turn caller requests into operations bound to fresh child contexts.
//! - Keep callers decoupled from contexts, queues and SQL.

mod request;
mod safe_store;

pub use request::{CreateRequest, FetchRequest, RemoveRequest};
pub use safe_store::SafeStore;
