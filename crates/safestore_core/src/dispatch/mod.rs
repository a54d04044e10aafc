//! Scheduling primitives: worker pool, serial confinement queues and the
//! main delivery queue.
//!
//! # Responsibility
//! - Confine every context to its own serial queue.
//! - Deliver operation results on the configured output thread.
//!
//! # Invariants
//! - Entries of one serial queue run one at a time, in submission order.
//! - A panicking job is logged and never takes a worker thread down.

mod main_queue;
mod pool;
mod queue;

pub use main_queue::is_main_queue;
pub(crate) use queue::SerialQueue;

use crate::config::{OutputThread, QueuePriority};
use pool::WorkerPool;

/// Runs `job` on the thread selected by `output`.
pub(crate) fn deliver(output: OutputThread, job: impl FnOnce() + Send + 'static) {
    match output {
        OutputThread::Main => main_queue::dispatch_main(Box::new(job)),
        OutputThread::Background => WorkerPool::global().submit(QueuePriority::Default, Box::new(job)),
    }
}
