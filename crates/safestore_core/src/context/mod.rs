//! Context manager.
//!
//! # Responsibility
//! - Cache one [`SharedContext`] per database configuration.
//! - Hand out a fresh [`ChildContext`] per operation, parented to it.
//! - Propagate child saves to the shared context under its save lock.
//!
//! # Invariants
//! - At most one shared context is ever built per configuration key.
//! - Child state is only touched on the child's serial queue.
//! - Lock order: child queue, child state, shared save lock, shared queue,
//!   shared state.

mod child;
mod object;
mod registry;
mod shared;

pub use child::ChildContext;
pub(crate) use child::save_propagating;
pub use object::{Draft, ManagedObject, ObjectRef};
pub use registry::ContextRegistry;
pub(crate) use shared::FetchSpec;
pub use shared::SharedContext;
