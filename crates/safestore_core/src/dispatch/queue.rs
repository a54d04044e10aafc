//! Serial confinement queue.
//!
//! # Invariants
//! - At most one closure runs on a queue at any time; entries run in FIFO order.
//! - `dispatch_sync` never needs a free pool thread: ownership of an idle or
//!   released queue is handed straight to the waiting caller.
//! - A thread already running on the queue re-enters it inline.

use super::pool::{run_job, Job, WorkerPool};
use crate::config::QueuePriority;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVE_QUEUES: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

enum Entry {
    Async(Job),
    /// Caller blocked in `dispatch_sync`; signalled when the queue is theirs.
    Sync(mpsc::Sender<()>),
}

struct QueueState {
    jobs: VecDeque<Entry>,
    running: bool,
}

struct QueueInner {
    id: u64,
    label: String,
    priority: QueuePriority,
    state: Mutex<QueueState>,
}

#[derive(Clone)]
pub(crate) struct SerialQueue {
    inner: Arc<QueueInner>,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>, priority: QueuePriority) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
                priority,
                state: Mutex::new(QueueState {
                    jobs: VecDeque::new(),
                    running: false,
                }),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether the calling thread is currently running on this queue.
    pub fn is_current(&self) -> bool {
        ACTIVE_QUEUES.with(|active| active.borrow().contains(&self.inner.id))
    }

    /// Appends `job`; it runs on the worker pool after every earlier entry.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        let start_drain = {
            let mut state = self.inner.state.lock();
            state.jobs.push_back(Entry::Async(Box::new(job)));
            !std::mem::replace(&mut state.running, true)
        };
        if start_drain {
            schedule_drain(&self.inner);
        }
    }

    /// Runs `f` on the calling thread once every earlier entry has run.
    pub fn dispatch_sync<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.is_current() {
            return f();
        }

        let waiter = {
            let mut state = self.inner.state.lock();
            if state.running {
                let (tx, rx) = mpsc::channel();
                state.jobs.push_back(Entry::Sync(tx));
                Some(rx)
            } else {
                state.running = true;
                None
            }
        };
        if let Some(rx) = waiter {
            // The sender is only dropped after signalling.
            let _ = rx.recv();
        }

        let _owner = OwnerGuard { inner: &self.inner };
        let _current = CurrentQueue::enter(self.inner.id);
        f()
    }
}

struct OwnerGuard<'a> {
    inner: &'a Arc<QueueInner>,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        release(self.inner);
    }
}

struct CurrentQueue;

impl CurrentQueue {
    fn enter(id: u64) -> Self {
        ACTIVE_QUEUES.with(|active| active.borrow_mut().push(id));
        Self
    }
}

impl Drop for CurrentQueue {
    fn drop(&mut self) {
        ACTIVE_QUEUES.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

/// Passes ownership of a queue to its next entry, or marks it idle.
fn release(inner: &Arc<QueueInner>) {
    let mut state = inner.state.lock();
    loop {
        match state.jobs.pop_front() {
            None => {
                state.running = false;
                return;
            }
            Some(Entry::Sync(tx)) => {
                if tx.send(()).is_ok() {
                    return;
                }
            }
            Some(Entry::Async(job)) => {
                state.jobs.push_front(Entry::Async(job));
                drop(state);
                schedule_drain(inner);
                return;
            }
        }
    }
}

fn schedule_drain(inner: &Arc<QueueInner>) {
    let queue = Arc::clone(inner);
    WorkerPool::global().submit(inner.priority, Box::new(move || drain(&queue)));
}

fn drain(inner: &Arc<QueueInner>) {
    loop {
        let entry = {
            let mut state = inner.state.lock();
            match state.jobs.pop_front() {
                Some(entry) => entry,
                None => {
                    state.running = false;
                    return;
                }
            }
        };
        match entry {
            Entry::Async(job) => {
                let _current = CurrentQueue::enter(inner.id);
                run_job(&inner.label, job);
            }
            Entry::Sync(tx) => {
                if tx.send(()).is_ok() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SerialQueue;
    use crate::config::QueuePriority;
    use parking_lot::Mutex;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn async_entries_run_in_submission_order() {
        let queue = SerialQueue::new("test.fifo", QueuePriority::Default);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for index in 0..50 {
            let seen = Arc::clone(&seen);
            queue.dispatch(move || seen.lock().push(index));
        }
        let snapshot = queue.dispatch_sync(|| seen.lock().clone());
        assert_eq!(snapshot, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn dispatch_sync_is_reentrant() {
        let queue = SerialQueue::new("test.reentrant", QueuePriority::Default);
        let value = queue.dispatch_sync(|| {
            assert!(queue.is_current());
            queue.dispatch_sync(|| 41) + 1
        });
        assert_eq!(value, 42);
        assert!(!queue.is_current());
    }

    #[test]
    fn dispatch_sync_waits_for_running_entry() {
        let queue = SerialQueue::new("test.wait", QueuePriority::Default);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&log);
        queue.dispatch(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            first_log.lock().push("async");
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let waiter_queue = queue.clone();
        let waiter_log = Arc::clone(&log);
        let waiter = std::thread::spawn(move || {
            waiter_queue.dispatch_sync(|| waiter_log.lock().push("sync"));
        });
        std::thread::sleep(Duration::from_millis(20));
        release_tx.send(()).unwrap();
        waiter.join().unwrap();

        assert_eq!(*log.lock(), vec!["async", "sync"]);
    }

    #[test]
    fn many_threads_serialize_through_dispatch_sync() {
        let queue = SerialQueue::new("test.contended", QueuePriority::UserInitiated);
        let counter = Arc::new(Mutex::new(0_u32));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        queue.dispatch_sync(|| {
                            let mut guard = counter.lock();
                            *guard += 1;
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock(), 800);
    }
}
