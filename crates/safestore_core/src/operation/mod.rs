//! Operation values and their execution-style adapters.
//!
//! # Responsibility
//! - Bundle one executor with the child context it runs in.
//! - Run it blocking, with a callback, as a future or as a stream.
//!
//! # Invariants
//! - Every adapter runs the same executor exactly once and reports the same
//!   value or error kind for the same inputs.
//! - Callbacks are delivered on the configured output thread.

mod executor;

pub(crate) use executor::{create, create_list, fetch, remove};

use crate::config::{Concurrency, OutputThread};
use crate::context::ChildContext;
use crate::dispatch::deliver;
use crate::error::{SafeStoreError, SafeStoreResult};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::future::IntoFuture;
use std::ops::Deref;
use tokio::sync::oneshot;

type Job<R> = Box<dyn FnOnce(&ChildContext) -> SafeStoreResult<R> + Send + 'static>;

enum Inner<R> {
    Prepared { context: ChildContext, job: Job<R> },
    Failed(SafeStoreError),
}

/// A store operation that has not run yet.
///
/// Nothing happens until one of the adapters consumes it:
/// [`wait`](Operation::wait), [`on_complete`](Operation::on_complete),
/// [`on_result`](Operation::on_result), `.await` or
/// [`into_stream`](Operation::into_stream).
#[must_use = "operations do nothing until waited on, awaited or given a callback"]
pub struct Operation<R> {
    inner: Inner<R>,
    concurrency: Concurrency,
    output: OutputThread,
}

impl<R> fmt::Debug for Operation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Operation");
        match &self.inner {
            Inner::Prepared { context, .. } => debug.field("context", context),
            Inner::Failed(err) => debug.field("error", err),
        };
        debug
            .field("concurrency", &self.concurrency)
            .field("output", &self.output)
            .finish()
    }
}

impl<R: Send + 'static> Operation<R> {
    pub(crate) fn new(
        context: ChildContext,
        concurrency: Concurrency,
        output: OutputThread,
        job: impl FnOnce(&ChildContext) -> SafeStoreResult<R> + Send + 'static,
    ) -> Self {
        Self {
            inner: Inner::Prepared {
                context,
                job: Box::new(job),
            },
            concurrency,
            output,
        }
    }

    /// Operation that reports `err` through whichever adapter consumes it.
    pub(crate) fn failed(err: SafeStoreError) -> Self {
        Self {
            inner: Inner::Failed(err),
            concurrency: Concurrency::default(),
            output: OutputThread::default(),
        }
    }

    /// Overrides the thread callbacks are delivered on.
    pub fn output_thread(mut self, output_thread: OutputThread) -> Self {
        self.output = output_thread;
        self
    }

    /// Overrides whether the executor runs on the caller's thread.
    pub fn concurrency(mut self, mode: Concurrency) -> Self {
        self.concurrency = mode;
        self
    }

    /// Runs the operation on the calling thread and returns its result.
    pub fn wait(self) -> OperationResult<R> {
        match self.inner {
            Inner::Prepared { context, job } => run(context, job),
            Inner::Failed(err) => OperationResult::failed(err),
        }
    }

    /// Runs the operation and hands the result to `callback`.
    ///
    /// With `Concurrency::Sync` the executor runs before this returns;
    /// otherwise it is queued on the context. The callback always runs on
    /// the configured output thread, failures included.
    pub fn on_complete(self, callback: impl FnOnce(OperationResult<R>) + Send + 'static) {
        let output = self.output;
        match (self.inner, self.concurrency) {
            (Inner::Prepared { context, job }, Concurrency::Sync) => {
                let result = run(context, job);
                deliver(output, move || callback(result));
            }
            (Inner::Prepared { context, job }, Concurrency::Async(_)) => {
                let queue = context.queue().clone();
                queue.dispatch(move || {
                    let result = run(context, job);
                    deliver(output, move || callback(result));
                });
            }
            (Inner::Failed(err), _) => {
                deliver(output, move || callback(OperationResult::failed(err)));
            }
        }
    }

    /// Like [`on_complete`](Operation::on_complete) with split callbacks.
    pub fn on_result(
        self,
        success: impl FnOnce(Attached<R>) + Send + 'static,
        failure: impl FnOnce(SafeStoreError) + Send + 'static,
    ) {
        self.on_complete(move |result| match result.into_attached() {
            Ok(attached) => success(attached),
            Err(err) => failure(err),
        });
    }

    /// Cold single-item stream: runs the operation when first polled.
    pub fn into_stream(self) -> BoxStream<'static, SafeStoreResult<Attached<R>>> {
        stream::once(self.into_future()).boxed()
    }
}

impl<R: Send + 'static> IntoFuture for Operation<R> {
    type Output = SafeStoreResult<Attached<R>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        async move {
            let (tx, rx) = oneshot::channel();
            self.on_complete(move |result| {
                // The receiver is gone only when the awaiting task was dropped.
                let _ = tx.send(result.into_attached());
            });
            rx.await.unwrap_or(Err(SafeStoreError::FailGetContext))
        }
        .boxed()
    }
}

fn run<R>(context: ChildContext, job: Job<R>) -> OperationResult<R> {
    let result = context.queue().clone().dispatch_sync(|| job(&context));
    OperationResult {
        result,
        context: Some(context),
    }
}

/// Outcome of an operation plus the context that produced it.
///
/// Object handles in the value stay usable while this (or the context
/// obtained from it) is alive.
#[derive(Debug)]
pub struct OperationResult<R> {
    result: SafeStoreResult<R>,
    context: Option<ChildContext>,
}

impl<R> OperationResult<R> {
    fn failed(err: SafeStoreError) -> Self {
        Self {
            result: Err(err),
            context: None,
        }
    }

    pub fn value(&self) -> Option<&R> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&SafeStoreError> {
        self.result.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn context(&self) -> Option<&ChildContext> {
        self.context.as_ref()
    }

    /// Drops the context; object handles in the value become detached.
    pub fn into_result(self) -> SafeStoreResult<R> {
        self.result
    }

    /// Keeps the context alive alongside the value.
    pub fn into_attached(self) -> SafeStoreResult<Attached<R>> {
        let value = self.result?;
        let context = self.context.ok_or(SafeStoreError::FailGetContext)?;
        Ok(Attached { value, context })
    }
}

/// Operation value bound to the child context that produced it.
#[derive(Debug)]
pub struct Attached<R> {
    value: R,
    context: ChildContext,
}

impl<R> Attached<R> {
    pub fn context(&self) -> &ChildContext {
        &self.context
    }

    /// Unwraps the value, releasing the context.
    pub fn into_inner(self) -> R {
        self.value
    }

    /// Splits into the value and the context keeping its handles alive.
    pub fn into_parts(self) -> (R, ChildContext) {
        (self.value, self.context)
    }
}

impl<R> Deref for Attached<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.value
    }
}
