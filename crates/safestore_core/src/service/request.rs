//! Fluent request builders returned by [`SafeStore`].

use super::SafeStore;
use crate::config::{Concurrency, CreateConfig, FetchConfig, OutputThread, RemoveConfig};
use crate::context::{Draft, ManagedObject};
use crate::model::{EntityType, ObjectId};
use crate::operation::Operation;
use crate::store::{Predicate, SortDescriptor};
use std::marker::PhantomData;

/// Create request for entity `T`.
#[must_use]
pub struct CreateRequest<'a, T: EntityType> {
    store: &'a SafeStore,
    config: CreateConfig,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, T: EntityType> CreateRequest<'a, T> {
    pub(crate) fn new(store: &'a SafeStore) -> Self {
        Self {
            store,
            config: CreateConfig::default(),
            _entity: PhantomData,
        }
    }

    pub fn with_config(mut self, config: CreateConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.config = self.config.concurrency(concurrency);
        self
    }

    pub fn output_thread(mut self, output_thread: OutputThread) -> Self {
        self.config = self.config.output_thread(output_thread);
        self
    }

    pub fn execute(
        self,
        mutate: impl FnOnce(&mut Draft<'_, T>) + Send + 'static,
    ) -> Operation<ManagedObject<T>> {
        self.store.create(&self.config, mutate)
    }

    pub fn execute_list<I: Send + 'static>(
        self,
        items: impl IntoIterator<Item = I>,
        mutate: impl FnMut(&mut Draft<'_, T>, I) + Send + 'static,
    ) -> Operation<Vec<ManagedObject<T>>> {
        self.store.create_list(&self.config, items, mutate)
    }
}

/// Fetch request for entity `T`.
#[must_use]
pub struct FetchRequest<'a, T: EntityType> {
    store: &'a SafeStore,
    config: FetchConfig,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, T: EntityType> FetchRequest<'a, T> {
    pub(crate) fn new(store: &'a SafeStore) -> Self {
        Self {
            store,
            config: FetchConfig::default(),
            _entity: PhantomData,
        }
    }

    pub fn with_config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.config = self.config.filter(filter);
        self
    }

    pub fn sort(mut self, sort: impl IntoIterator<Item = SortDescriptor>) -> Self {
        self.config = self.config.sort(sort);
        self
    }

    pub fn fetch_batch_size(mut self, size: usize) -> Self {
        self.config = self.config.fetch_batch_size(size);
        self
    }

    pub fn fetch_limit(mut self, limit: usize) -> Self {
        self.config = self.config.fetch_limit(limit);
        self
    }

    pub fn fetch_offset(mut self, offset: usize) -> Self {
        self.config = self.config.fetch_offset(offset);
        self
    }

    pub fn includes_subentities(mut self, include: bool) -> Self {
        self.config = self.config.includes_subentities(include);
        self
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.config = self.config.concurrency(concurrency);
        self
    }

    pub fn output_thread(mut self, output_thread: OutputThread) -> Self {
        self.config = self.config.output_thread(output_thread);
        self
    }

    pub fn execute(self) -> Operation<Vec<ManagedObject<T>>> {
        self.store.fetch(&self.config)
    }
}

/// Batch remove request for entity `T`.
#[must_use]
pub struct RemoveRequest<'a, T: EntityType> {
    store: &'a SafeStore,
    config: RemoveConfig,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, T: EntityType> RemoveRequest<'a, T> {
    pub(crate) fn new(store: &'a SafeStore) -> Self {
        Self {
            store,
            config: RemoveConfig::default(),
            _entity: PhantomData,
        }
    }

    pub fn with_config(mut self, config: RemoveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.config = self.config.filter(filter);
        self
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.config = self.config.concurrency(concurrency);
        self
    }

    pub fn output_thread(mut self, output_thread: OutputThread) -> Self {
        self.config = self.config.output_thread(output_thread);
        self
    }

    pub fn execute(self) -> Operation<Vec<ObjectId>> {
        self.store.remove::<T>(&self.config)
    }
}
