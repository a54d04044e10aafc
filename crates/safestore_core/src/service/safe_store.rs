//! Store service: the entry point callers hold on to.
//!
//! # Responsibility
//! - Resolve the shared context of one database configuration at open time.
//! - Start create/fetch/remove operations, each in a fresh child context.
//!
//! # Invariants
//! - Opening fails fast with `NoDataBaseModel` when the model is missing.
//! - Every operation gets its own child context; none is ever reused.

use super::request::{CreateRequest, FetchRequest, RemoveRequest};
use crate::config::{Concurrency, CreateConfig, DatabaseConfig, FetchConfig, QueuePriority, RemoveConfig};
use crate::context::{ChildContext, ContextRegistry, Draft, ManagedObject, SharedContext};
use crate::error::SafeStoreResult;
use crate::model::{EntityType, ObjectId};
use crate::operation::{self, Operation};
use log::info;
use std::sync::Arc;
use uuid::Uuid;

/// Convenience layer over one persistent store.
///
/// Cheap to clone; clones share the same shared context.
#[derive(Debug, Clone)]
pub struct SafeStore {
    registry: Arc<ContextRegistry>,
    config: DatabaseConfig,
    shared: Arc<SharedContext>,
}

impl SafeStore {
    /// Opens `config` through the process-wide [`ContextRegistry`].
    ///
    /// # Errors
    /// - `NoDataBaseModel` when the model cannot be located or loaded.
    ///
    /// # Panics
    /// - When the store cannot be attached although the model loaded.
    pub fn open(config: DatabaseConfig) -> SafeStoreResult<Self> {
        Self::open_with_registry(config, ContextRegistry::global())
    }

    /// Opens `config` through a caller-owned registry.
    pub fn open_with_registry(
        config: DatabaseConfig,
        registry: Arc<ContextRegistry>,
    ) -> SafeStoreResult<Self> {
        let shared = registry.shared_context(&config)?;
        info!(
            "event=store_open module=service status=ok model={} store_id={}",
            config.model_name(),
            shared.store_identifier()
        );
        Ok(Self {
            registry,
            config,
            shared,
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    pub fn shared_context(&self) -> &Arc<SharedContext> {
        &self.shared
    }

    pub fn store_identifier(&self) -> Uuid {
        self.shared.store_identifier()
    }

    /// Fresh child context parented to this store's shared context.
    pub fn new_child_context(&self) -> ChildContext {
        self.shared.new_child(QueuePriority::UserInteractive)
    }

    fn child_for(&self, concurrency: Concurrency) -> ChildContext {
        let priority = match concurrency {
            Concurrency::Sync => QueuePriority::UserInteractive,
            Concurrency::Async(priority) => priority,
        };
        self.shared.new_child(priority)
    }

    pub fn create_request<T: EntityType>(&self) -> CreateRequest<'_, T> {
        CreateRequest::new(self)
    }

    pub fn fetch_request<T: EntityType>(&self) -> FetchRequest<'_, T> {
        FetchRequest::new(self)
    }

    pub fn remove_request<T: EntityType>(&self) -> RemoveRequest<'_, T> {
        RemoveRequest::new(self)
    }

    /// Creates one `T`, filled by `mutate`, and saves it.
    ///
    /// Fails with `FailCreate` when `T` is not part of the model and with
    /// `FailSave` when the commit fails.
    pub fn create<T: EntityType>(
        &self,
        config: &CreateConfig,
        mutate: impl FnOnce(&mut Draft<'_, T>) + Send + 'static,
    ) -> Operation<ManagedObject<T>> {
        Operation::new(
            self.child_for(config.concurrency),
            config.concurrency,
            config.output_thread,
            move |context| operation::create(context, mutate),
        )
    }

    /// Creates one `T` per item inside a single child context, saving once.
    pub fn create_list<T, I>(
        &self,
        config: &CreateConfig,
        items: impl IntoIterator<Item = I>,
        mutate: impl FnMut(&mut Draft<'_, T>, I) + Send + 'static,
    ) -> Operation<Vec<ManagedObject<T>>>
    where
        T: EntityType,
        I: Send + 'static,
    {
        let items: Vec<I> = items.into_iter().collect();
        Operation::new(
            self.child_for(config.concurrency),
            config.concurrency,
            config.output_thread,
            move |context| operation::create_list(context, items, mutate),
        )
    }

    /// Fetches `T` objects matching `config`.
    pub fn fetch<T: EntityType>(&self, config: &FetchConfig) -> Operation<Vec<ManagedObject<T>>> {
        let query = config.clone();
        Operation::new(
            self.child_for(config.concurrency),
            config.concurrency,
            config.output_thread,
            move |context| operation::fetch(context, &query),
        )
    }

    /// Batch-deletes `T` objects matching `config`, yielding their identifiers.
    pub fn remove<T: EntityType>(&self, config: &RemoveConfig) -> Operation<Vec<ObjectId>> {
        let scope = config.clone();
        Operation::new(
            self.child_for(config.concurrency),
            config.concurrency,
            config.output_thread,
            move |context| operation::remove::<T>(context, &scope),
        )
    }
}
