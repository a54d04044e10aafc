//! Process-wide "main" delivery queue backed by one dedicated thread.

use super::pool::{run_job, Job};
use log::error;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::mpsc;

static MAIN_QUEUE: Lazy<MainQueue> = Lazy::new(MainQueue::start);

thread_local! {
    static ON_MAIN_QUEUE: Cell<bool> = const { Cell::new(false) };
}

struct MainQueue {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
}

impl MainQueue {
    fn start() -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let spawned = std::thread::Builder::new()
            .name("safestore-main".to_string())
            .spawn(move || {
                ON_MAIN_QUEUE.with(|flag| flag.set(true));
                for job in rx {
                    run_job("main", job);
                }
            });
        let sender = match spawned {
            Ok(_) => Some(tx),
            Err(err) => {
                error!("event=main_queue_start module=dispatch status=error error={err}");
                None
            }
        };
        Self {
            sender: Mutex::new(sender),
        }
    }
}

/// Runs `job` on the main delivery thread, in submission order.
pub(crate) fn dispatch_main(job: Job) {
    let rejected = {
        let sender = MAIN_QUEUE.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx.send(job).err().map(|failed| failed.0),
            None => Some(job),
        }
    };
    if let Some(job) = rejected {
        run_job("main", job);
    }
}

/// Whether the calling thread is the main delivery thread.
pub fn is_main_queue() -> bool {
    ON_MAIN_QUEUE.with(Cell::get)
}
