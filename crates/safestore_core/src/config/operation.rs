//! Per-operation configuration: concurrency mode, delivery thread, query shape.

use crate::store::{Predicate, SortDescriptor};

/// Priority lane of the worker pool, highest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueuePriority {
    #[default]
    UserInteractive,
    UserInitiated,
    Default,
    Utility,
    Background,
}

impl QueuePriority {
    #[cfg(test)]
    pub(crate) const ALL: [QueuePriority; 5] = [
        Self::UserInteractive,
        Self::UserInitiated,
        Self::Default,
        Self::Utility,
        Self::Background,
    ];

    pub(crate) fn lane(self) -> usize {
        self as usize
    }
}

/// How the operation's work is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concurrency {
    /// Run on the calling thread before returning.
    Sync,
    /// Run on the worker pool at the given priority.
    Async(QueuePriority),
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::Async(QueuePriority::UserInteractive)
    }
}

/// Where completion callbacks are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OutputThread {
    /// The process-wide main delivery queue.
    #[default]
    Main,
    /// Any worker pool thread.
    Background,
}

#[derive(Debug, Clone, Default)]
pub struct CreateConfig {
    pub concurrency: Concurrency,
    pub output_thread: OutputThread,
}

impl CreateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn output_thread(mut self, output_thread: OutputThread) -> Self {
        self.output_thread = output_thread;
        self
    }
}

/// Query shape of a fetch.
///
/// `fetch_limit == 0` means no limit.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub filter: Option<Predicate>,
    pub sort: Vec<SortDescriptor>,
    pub fetch_batch_size: usize,
    pub fetch_limit: usize,
    pub fetch_offset: usize,
    pub includes_subentities: bool,
    pub concurrency: Concurrency,
    pub output_thread: OutputThread,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            filter: None,
            sort: Vec::new(),
            fetch_batch_size: 0,
            fetch_limit: 0,
            fetch_offset: 0,
            includes_subentities: true,
            concurrency: Concurrency::default(),
            output_thread: OutputThread::default(),
        }
    }
}

impl FetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort(mut self, sort: impl IntoIterator<Item = SortDescriptor>) -> Self {
        self.sort = sort.into_iter().collect();
        self
    }

    pub fn fetch_batch_size(mut self, size: usize) -> Self {
        self.fetch_batch_size = size;
        self
    }

    pub fn fetch_limit(mut self, limit: usize) -> Self {
        self.fetch_limit = limit;
        self
    }

    pub fn fetch_offset(mut self, offset: usize) -> Self {
        self.fetch_offset = offset;
        self
    }

    pub fn includes_subentities(mut self, include: bool) -> Self {
        self.includes_subentities = include;
        self
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn output_thread(mut self, output_thread: OutputThread) -> Self {
        self.output_thread = output_thread;
        self
    }
}

/// Scope of a batch delete; no filter removes every object of the entity.
#[derive(Debug, Clone, Default)]
pub struct RemoveConfig {
    pub filter: Option<Predicate>,
    pub concurrency: Concurrency,
    pub output_thread: OutputThread,
}

impl RemoveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn output_thread(mut self, output_thread: OutputThread) -> Self {
        self.output_thread = output_thread;
        self
    }
}
