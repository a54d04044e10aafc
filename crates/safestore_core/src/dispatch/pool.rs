//! Process-wide worker pool with priority lanes.

use crate::config::QueuePriority;
use crate::logging::panic_payload_summary;
use log::{error, info};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

const MIN_WORKERS: usize = 2;
const MAX_WORKERS: usize = 16;

static POOL: Lazy<WorkerPool> = Lazy::new(WorkerPool::start);

struct PoolInner {
    lanes: Mutex<[VecDeque<Job>; 5]>,
    work_ready: Condvar,
}

/// Fixed set of worker threads serving the highest non-empty lane first.
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: usize,
}

impl WorkerPool {
    pub fn global() -> &'static WorkerPool {
        &POOL
    }

    fn start() -> Self {
        let inner = Arc::new(PoolInner {
            lanes: Mutex::new(Default::default()),
            work_ready: Condvar::new(),
        });
        let wanted = std::thread::available_parallelism()
            .map_or(MIN_WORKERS, |n| n.get())
            .clamp(MIN_WORKERS, MAX_WORKERS);

        let mut workers = 0;
        for index in 0..wanted {
            let worker_inner = Arc::clone(&inner);
            let spawned = std::thread::Builder::new()
                .name(format!("safestore-worker-{index}"))
                .spawn(move || worker_loop(&worker_inner));
            match spawned {
                Ok(_) => workers += 1,
                Err(err) => {
                    error!(
                        "event=pool_start module=dispatch status=error worker={index} error={err}"
                    );
                    break;
                }
            }
        }
        info!("event=pool_start module=dispatch status=ok workers={workers}");

        Self { inner, workers }
    }

    /// Queues `job` on the lane of `priority`.
    ///
    /// Without any worker thread the job runs on the caller's thread.
    pub fn submit(&self, priority: QueuePriority, job: Job) {
        if self.workers == 0 {
            run_job("pool", job);
            return;
        }
        self.inner.lanes.lock()[priority.lane()].push_back(job);
        self.inner.work_ready.notify_one();
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut lanes = inner.lanes.lock();
            loop {
                if let Some(job) = lanes.iter_mut().find_map(VecDeque::pop_front) {
                    break job;
                }
                inner.work_ready.wait(&mut lanes);
            }
        };
        run_job("pool", job);
    }
}

/// Runs `job`, logging instead of unwinding when it panics.
pub(crate) fn run_job(label: &str, job: Job) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
        error!(
            "event=job_panic module=dispatch status=error queue={label} payload={}",
            panic_payload_summary(payload.as_ref())
        );
    }
}
