//! Cache of shared contexts keyed by configuration fingerprint.

use super::{ChildContext, SharedContext};
use crate::config::{ConfigKey, DatabaseConfig, QueuePriority};
use crate::error::SafeStoreResult;
use log::info;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

static GLOBAL_REGISTRY: Lazy<Arc<ContextRegistry>> = Lazy::new(|| Arc::new(ContextRegistry::new()));

/// Maps each database configuration to its single [`SharedContext`].
///
/// Entries live as long as the registry; there is no eviction.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: Mutex<HashMap<ConfigKey, Arc<SharedContext>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by [`SafeStore::open`](crate::SafeStore::open).
    pub fn global() -> Arc<ContextRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Returns the cached shared context for `config`, building it on first use.
    ///
    /// The lookup, the build and the insert happen under one lock, so racing
    /// first callers never attach the same store twice.
    pub fn shared_context(&self, config: &DatabaseConfig) -> SafeStoreResult<Arc<SharedContext>> {
        let key = config.key();
        let mut contexts = self.contexts.lock();
        if let Some(shared) = contexts.get(&key) {
            return Ok(Arc::clone(shared));
        }

        let shared = SharedContext::build(config)?;
        contexts.insert(key, Arc::clone(&shared));
        info!(
            "event=registry_insert module=context status=ok model={} cached={}",
            config.model_name(),
            contexts.len()
        );
        Ok(shared)
    }

    /// Fresh child context parented to the shared context of `config`.
    pub fn new_child_context(&self, config: &DatabaseConfig) -> SafeStoreResult<ChildContext> {
        Ok(self
            .shared_context(config)?
            .new_child(QueuePriority::UserInteractive))
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    pub fn contains(&self, config: &DatabaseConfig) -> bool {
        self.contexts.lock().contains_key(&config.key())
    }
}

#[cfg(test)]
mod tests {
    use super::ContextRegistry;
    use crate::config::{DatabaseConfig, StoreKind};
    use crate::error::ErrorKind;
    use crate::model::{AttributeType, Bundle, EntityDescription, Model};
    use std::sync::Arc;

    fn config(name: &str) -> DatabaseConfig {
        let model = Model::new(name).entity(EntityDescription::new("Item").attribute("n", AttributeType::Integer));
        DatabaseConfig::new(name, Bundle::model(model)).store_kind(StoreKind::Memory)
    }

    #[test]
    fn same_config_yields_same_shared_context() {
        let registry = ContextRegistry::new();
        let config = config("RegistryOne");
        let first = registry.shared_context(&config).unwrap();
        let second = registry.shared_context(&config.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&config));

        let child = registry.new_child_context(&config).unwrap();
        assert!(Arc::ptr_eq(child.shared(), &first));
    }

    #[test]
    fn concurrent_first_access_builds_once() {
        let registry = Arc::new(ContextRegistry::new());
        let config = config("RegistryRace");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let config = config.clone();
                std::thread::spawn(move || registry.shared_context(&config).unwrap())
            })
            .collect();
        let contexts: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        assert!(contexts.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_model_is_not_cached() {
        let registry = ContextRegistry::new();
        let config = DatabaseConfig::new("Absent", crate::model::Bundle::directory("/nonexistent"))
            .store_kind(StoreKind::Memory);
        let err = registry.shared_context(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoDataBaseModel);
        assert!(registry.is_empty());
    }
}
