//! Long-lived shared context: owns the store connection for one configuration.
//!
//! # Invariants
//! - Every touch of the connection happens on the context's serial queue.
//! - Pending changes are either committed together or discarded together.
//! - Primary keys are handed out monotonically and never reused.

use super::ChildContext;
use crate::config::{ConfigKey, DatabaseConfig, QueuePriority};
use crate::dispatch::SerialQueue;
use crate::error::{SafeStoreError, SafeStoreResult};
use crate::model::{Model, ObjectId, Value};
use crate::store::sql::{self, RowData, RowQuery, RowWrite};
use crate::store::{
    attach, order_by, AttachedStore, Predicate, RowKey, SortDescriptor, StoreError,
    StoreLocation, StoreResult,
};
use log::{error, info};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Relationship target inside a change set.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RelRef {
    Persisted(RowKey),
    /// Object inserted by the same change set, identified by its child slot.
    Inserted(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct InsertChange {
    pub slot: usize,
    pub entity: String,
    pub root: String,
    pub attributes: Vec<(String, Value)>,
    pub relations: Vec<(String, Option<RelRef>)>,
}

#[derive(Debug, Clone)]
pub(crate) struct UpdateChange {
    pub slot: usize,
    pub key: RowKey,
    pub attributes: Vec<(String, Value)>,
    pub relations: Vec<(String, Option<RelRef>)>,
}

#[derive(Debug, Clone)]
pub(crate) struct DeleteChange {
    pub slot: usize,
    pub key: RowKey,
}

/// Changes a child context pushes to its shared context.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeSet {
    pub inserts: Vec<InsertChange>,
    pub updates: Vec<UpdateChange>,
    pub deletes: Vec<DeleteChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Permanent identity assigned to an inserted child slot.
#[derive(Debug, Clone)]
pub(crate) struct Assigned {
    pub slot: usize,
    pub key: RowKey,
    pub object_id: ObjectId,
}

enum ResolvedChange {
    Insert {
        key: RowKey,
        entity: String,
        write: RowWrite,
    },
    Update {
        key: RowKey,
        write: RowWrite,
    },
    Delete {
        key: RowKey,
    },
}

/// Query handed to [`SharedContext::fetch_rows`].
#[derive(Debug, Clone)]
pub(crate) struct FetchSpec {
    pub entity: String,
    pub includes_subentities: bool,
    pub filter: Option<Predicate>,
    pub sort: Vec<SortDescriptor>,
    pub limit: usize,
    pub offset: usize,
    pub batch_size: usize,
}

struct SharedState {
    store: AttachedStore,
    next_pk: HashMap<String, i64>,
    pending: Vec<ResolvedChange>,
}

/// The "main" context of one database configuration.
///
/// Created once per [`ConfigKey`] by the
/// [`ContextRegistry`](crate::ContextRegistry) and kept for the process
/// lifetime.
pub struct SharedContext {
    key: ConfigKey,
    model: Arc<Model>,
    queue: SerialQueue,
    state: Mutex<SharedState>,
    save_lock: Mutex<()>,
    store_id: Uuid,
    location: StoreLocation,
}

impl std::fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContext")
            .field("model", &self.model.name)
            .field("store_id", &self.store_id)
            .field("location", &self.location)
            .finish()
    }
}

impl SharedContext {
    /// Loads the model and attaches the store.
    ///
    /// # Errors
    /// - `NoDataBaseModel` when the model cannot be located or is invalid.
    ///
    /// # Panics
    /// - When the store cannot be attached although the model loaded.
    pub(crate) fn build(config: &DatabaseConfig) -> SafeStoreResult<Arc<Self>> {
        let model = config
            .bundle()
            .load(config.model_name(), config.version())
            .map_err(|err| {
                error!(
                    "event=model_load module=context status=error model={} error={}",
                    config.model_name(),
                    err
                );
                SafeStoreError::NoDataBaseModel
            })?;

        let store = match attach(config, &model) {
            Ok(store) => store,
            Err(err) => {
                error!(
                    "event=shared_context_build module=context status=error model={} error={}",
                    config.model_name(),
                    err
                );
                panic!(
                    "unable to attach persistent store for model `{}`: {err}",
                    config.model_name()
                );
            }
        };

        let mut next_pk = HashMap::new();
        for root in model.root_entities() {
            match sql::max_pk(&store.conn, &root.name) {
                Ok(max) => {
                    next_pk.insert(root.name.clone(), max + 1);
                }
                Err(err) => {
                    error!(
                        "event=shared_context_build module=context status=error model={} error={}",
                        config.model_name(),
                        err
                    );
                    panic!(
                        "unable to read persistent store for model `{}`: {err}",
                        config.model_name()
                    );
                }
            }
        }

        let store_id = store.store_id;
        let location = store.location.clone();
        info!(
            "event=shared_context_build module=context status=ok model={} store_id={} location={}",
            model.name, store_id, location
        );
        Ok(Arc::new(Self {
            key: config.key(),
            queue: SerialQueue::new(
                format!("safestore.shared.{}", model.name),
                QueuePriority::UserInteractive,
            ),
            model,
            state: Mutex::new(SharedState {
                store,
                next_pk,
                pending: Vec::new(),
            }),
            save_lock: Mutex::new(()),
            store_id,
            location,
        }))
    }

    /// New child context parented to this shared context.
    pub fn new_child(self: &Arc<Self>, priority: QueuePriority) -> ChildContext {
        ChildContext::new(Arc::clone(self), priority)
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn config_key(&self) -> &ConfigKey {
        &self.key
    }

    /// Unique identifier stored inside the persistent store.
    pub fn store_identifier(&self) -> Uuid {
        self.store_id
    }

    pub fn store_location(&self) -> &StoreLocation {
        &self.location
    }

    /// Whether merged changes are waiting for a commit.
    pub fn has_changes(&self) -> bool {
        self.queue
            .dispatch_sync(|| !self.state.lock().pending.is_empty())
    }

    pub(crate) fn object_id(&self, entity: &str, pk: i64) -> ObjectId {
        ObjectId::new(self.store_id, entity, pk)
    }

    /// Serialises child-to-shared save hand-offs.
    pub(crate) fn save_guard(&self) -> MutexGuard<'_, ()> {
        self.save_lock.lock()
    }

    /// Takes a child's changes, assigning primary keys to its inserts.
    pub(crate) fn merge(&self, changes: ChangeSet) -> StoreResult<Vec<Assigned>> {
        self.queue.dispatch_sync(|| {
            let mut state = self.state.lock();
            let mut assigned = Vec::with_capacity(changes.inserts.len());
            let mut slot_keys: HashMap<usize, RowKey> = HashMap::new();

            for insert in &changes.inserts {
                let next = state.next_pk.entry(insert.root.clone()).or_insert(1);
                let pk = *next;
                *next += 1;
                let key = RowKey::new(insert.root.clone(), pk);
                slot_keys.insert(insert.slot, key.clone());
                assigned.push(Assigned {
                    slot: insert.slot,
                    key,
                    object_id: self.object_id(&insert.entity, pk),
                });
            }

            let mut resolved = Vec::new();
            for insert in changes.inserts {
                let key = slot_keys.get(&insert.slot).cloned().ok_or_else(|| {
                    StoreError::InvalidData(format!("insert slot {} lost its key", insert.slot))
                })?;
                resolved.push(ResolvedChange::Insert {
                    key,
                    entity: insert.entity,
                    write: RowWrite {
                        attributes: insert.attributes,
                        relations: resolve_relations(insert.relations, &slot_keys)?,
                    },
                });
            }
            for update in changes.updates {
                resolved.push(ResolvedChange::Update {
                    key: update.key,
                    write: RowWrite {
                        attributes: update.attributes,
                        relations: resolve_relations(update.relations, &slot_keys)?,
                    },
                });
            }
            for delete in changes.deletes {
                resolved.push(ResolvedChange::Delete { key: delete.key });
            }

            state.pending.extend(resolved);
            Ok(assigned)
        })
    }

    /// Commits pending changes in one transaction.
    ///
    /// Returns `false` when nothing was pending. On failure the pending
    /// changes are discarded.
    pub(crate) fn save(&self) -> StoreResult<bool> {
        self.queue.dispatch_sync(|| {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.pending.is_empty() {
                return Ok(false);
            }
            let pending = std::mem::take(&mut state.pending);
            let started_at = Instant::now();
            let count = pending.len();

            let result = commit(&mut state.store, &self.model, pending);
            match &result {
                Ok(()) => info!(
                    "event=store_commit module=context status=ok changes={} duration_ms={}",
                    count,
                    started_at.elapsed().as_millis()
                ),
                Err(err) => error!(
                    "event=store_commit module=context status=error changes={} duration_ms={} error={}",
                    count,
                    started_at.elapsed().as_millis(),
                    err
                ),
            }
            result.map(|()| true)
        })
    }

    pub(crate) fn fetch_rows(&self, spec: &FetchSpec) -> StoreResult<Vec<RowData>> {
        let root = self
            .model
            .root_name(&spec.entity)
            .ok_or_else(|| StoreError::Validation(format!("unknown entity `{}`", spec.entity)))?
            .to_string();
        let entities = self.entity_set(&spec.entity, spec.includes_subentities);
        let filter = spec
            .filter
            .as_ref()
            .map(|predicate| predicate.compile(&self.model, &spec.entity))
            .transpose()?;
        let order = order_by(&self.model, &spec.entity, &spec.sort)?;
        let limit = (spec.limit > 0).then_some(spec.limit);

        self.queue.dispatch_sync(|| {
            let state = self.state.lock();
            let conn = &state.store.conn;
            let mut query = RowQuery {
                entities,
                filter: filter.map(|compiled| (compiled.sql, compiled.params)),
                order,
                limit,
                offset: spec.offset,
            };

            if spec.batch_size == 0 {
                return sql::select_rows(conn, &self.model, &root, &query);
            }

            let mut rows = Vec::new();
            loop {
                let remaining = limit.map(|limit| limit - rows.len());
                if remaining == Some(0) {
                    break;
                }
                let take = remaining.map_or(spec.batch_size, |r| r.min(spec.batch_size));
                query.limit = Some(take);
                query.offset = spec.offset + rows.len();
                let batch = sql::select_rows(conn, &self.model, &root, &query)?;
                let exhausted = batch.len() < take;
                rows.extend(batch);
                if exhausted {
                    break;
                }
            }
            Ok(rows)
        })
    }

    pub(crate) fn load_row(&self, key: &RowKey) -> StoreResult<Option<RowData>> {
        self.queue
            .dispatch_sync(|| sql::load_row(&self.state.lock().store.conn, &self.model, key))
    }

    /// Deletes every matching object of `entity` and its sub-entities.
    pub(crate) fn batch_delete(
        &self,
        entity: &str,
        filter: Option<&Predicate>,
    ) -> StoreResult<Vec<ObjectId>> {
        let root = self
            .model
            .root_name(entity)
            .ok_or_else(|| StoreError::Validation(format!("unknown entity `{entity}`")))?
            .to_string();
        let compiled = filter
            .map(|predicate| predicate.compile(&self.model, entity))
            .transpose()?;
        let query = RowQuery {
            entities: self.entity_set(entity, true),
            filter: compiled.map(|compiled| (compiled.sql, compiled.params)),
            ..RowQuery::default()
        };

        let _save = self.save_guard();
        self.queue.dispatch_sync(|| {
            let started_at = Instant::now();
            let mut state = self.state.lock();
            let tx = state.store.conn.transaction()?;
            let deleted = sql::batch_delete(&tx, &self.model, &root, &query)?;
            tx.commit()?;
            state.store.persist_snapshot()?;
            info!(
                "event=batch_delete module=context status=ok entity={} deleted={} duration_ms={}",
                entity,
                deleted.len(),
                started_at.elapsed().as_millis()
            );
            Ok(deleted
                .into_iter()
                .map(|(pk, entity)| self.object_id(&entity, pk))
                .collect())
        })
    }

    fn entity_set(&self, entity: &str, includes_subentities: bool) -> Vec<&str> {
        if includes_subentities {
            self.model.entity_and_descendants(entity)
        } else {
            self.model
                .find_entity(entity)
                .map(|found| vec![found.name.as_str()])
                .unwrap_or_default()
        }
    }
}

fn resolve_relations(
    relations: Vec<(String, Option<RelRef>)>,
    slot_keys: &HashMap<usize, RowKey>,
) -> StoreResult<Vec<(String, Option<i64>)>> {
    relations
        .into_iter()
        .map(|(name, target)| {
            let pk = match target {
                None => None,
                Some(RelRef::Persisted(key)) => Some(key.pk),
                Some(RelRef::Inserted(slot)) => Some(
                    slot_keys
                        .get(&slot)
                        .ok_or_else(|| {
                            StoreError::InvalidData(format!(
                                "relationship `{name}` targets an object outside the save"
                            ))
                        })?
                        .pk,
                ),
            };
            Ok((name, pk))
        })
        .collect()
}

fn commit(store: &mut AttachedStore, model: &Model, pending: Vec<ResolvedChange>) -> StoreResult<()> {
    let tx = store.conn.transaction()?;
    for change in &pending {
        match change {
            ResolvedChange::Insert { key, entity, write } => {
                sql::insert_row(&tx, &key.root, key.pk, entity, write)?;
            }
            ResolvedChange::Update { key, write } => sql::update_row(&tx, key, write)?,
            ResolvedChange::Delete { key } => sql::delete_row(&tx, model, key)?,
        }
    }
    tx.commit()?;
    store.persist_snapshot()
}
