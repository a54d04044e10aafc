//! Per-operation child context and its object graph.
//!
//! # Responsibility
//! - Stage inserts, updates and deletions until they are saved.
//! - Keep to-one relationships and their inverses consistent in memory.
//! - Push staged changes to the shared context and commit them there.
//!
//! # Invariants
//! - A slot index never changes meaning for the lifetime of the context.
//! - Each persisted row is represented by at most one slot.
//! - A deletion that was saved turns its slot into a dead slot.

use super::shared::{Assigned, ChangeSet, DeleteChange, InsertChange, RelRef, UpdateChange};
use super::SharedContext;
use crate::config::QueuePriority;
use crate::dispatch::SerialQueue;
use crate::error::{SafeStoreError, SafeStoreResult};
use crate::model::{Model, ObjectId, Value};
use crate::store::sql::RowData;
use crate::store::{RowKey, StoreError, StoreResult};
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotStatus {
    /// Created in this context, not yet saved.
    Inserted,
    Persisted,
    /// Marked for deletion, not yet saved.
    Deleted,
    /// Deleted and saved, or discarded before its first save.
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RelationTarget {
    Slot(usize),
    /// Persisted row not loaded into this context yet.
    Fault(RowKey),
}

#[derive(Debug, Clone)]
pub(crate) struct ObjectSlot {
    pub entity: String,
    pub key: Option<RowKey>,
    pub object_id: Option<ObjectId>,
    pub values: HashMap<String, Value>,
    pub relations: HashMap<String, Option<RelationTarget>>,
    pub status: SlotStatus,
    pub dirty: HashSet<String>,
}

/// Object graph owned by one child context.
#[derive(Debug, Default)]
pub(crate) struct ContextState {
    slots: Vec<ObjectSlot>,
    by_key: HashMap<RowKey, usize>,
    rejected: Vec<StoreError>,
}

impl ContextState {
    pub fn slot(&self, slot: usize) -> Option<&ObjectSlot> {
        self.slots.get(slot)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Fails with `FailGetContext` unless `slot` is a live object.
    pub fn check_live(&self, slot: usize) -> SafeStoreResult<&ObjectSlot> {
        match self.slots.get(slot) {
            Some(found) if found.status != SlotStatus::Removed => Ok(found),
            _ => Err(SafeStoreError::FailGetContext),
        }
    }

    /// Inserts a new object of `entity` with its attribute defaults.
    pub fn insert_new(&mut self, model: &Model, entity: &str) -> SafeStoreResult<usize> {
        let description = model.find_entity(entity).ok_or_else(|| {
            debug!("event=create module=context status=error entity={entity} reason=unknown");
            SafeStoreError::FailCreate
        })?;
        if description.is_abstract {
            debug!("event=create module=context status=error entity={entity} reason=abstract");
            return Err(SafeStoreError::FailCreate);
        }

        let mut values = HashMap::new();
        for attribute in model.attributes_of(entity) {
            let value = match &attribute.default_value {
                Some(default) => attribute
                    .kind
                    .coerce(default.clone())
                    .unwrap_or(Value::Null),
                None => Value::Null,
            };
            values.insert(attribute.name.clone(), value);
        }

        self.slots.push(ObjectSlot {
            entity: entity.to_string(),
            key: None,
            object_id: None,
            values,
            relations: HashMap::new(),
            status: SlotStatus::Inserted,
            dirty: HashSet::new(),
        });
        Ok(self.slots.len() - 1)
    }

    /// Drops every object inserted at or after `start` that is still unsaved.
    pub fn discard_from(&mut self, start: usize) {
        for slot in self.slots.iter_mut().skip(start) {
            if slot.status == SlotStatus::Inserted {
                slot.status = SlotStatus::Removed;
            }
        }
    }

    /// Registers a fetched row, reusing the slot already representing it.
    ///
    /// Values changed in this context but not yet saved are kept.
    pub fn register_row(&mut self, row: RowData, shared: &SharedContext) -> usize {
        let by_key = &self.by_key;
        let relations: HashMap<String, Option<RelationTarget>> = row
            .relations
            .into_iter()
            .map(|(name, target)| {
                let target = target.map(|key| match by_key.get(&key) {
                    Some(&slot) => RelationTarget::Slot(slot),
                    None => RelationTarget::Fault(key),
                });
                (name, target)
            })
            .collect();

        if let Some(&slot) = self.by_key.get(&row.key) {
            let existing = &mut self.slots[slot];
            for (name, value) in row.attributes {
                if !existing.dirty.contains(&name) {
                    existing.values.insert(name, value);
                }
            }
            for (name, target) in relations {
                if !existing.dirty.contains(&name) {
                    existing.relations.insert(name, target);
                }
            }
            return slot;
        }

        let object_id = shared.object_id(&row.entity, row.key.pk);
        self.slots.push(ObjectSlot {
            entity: row.entity,
            key: Some(row.key.clone()),
            object_id: Some(object_id),
            values: row.attributes,
            relations,
            status: SlotStatus::Persisted,
            dirty: HashSet::new(),
        });
        let slot = self.slots.len() - 1;
        self.by_key.insert(row.key, slot);
        slot
    }

    /// Slot for `key`, loading the row from the shared context when needed.
    fn materialize(&mut self, shared: &SharedContext, key: &RowKey) -> StoreResult<Option<usize>> {
        if let Some(&slot) = self.by_key.get(key) {
            return Ok(Some(slot));
        }
        match shared.load_row(key)? {
            Some(row) => Ok(Some(self.register_row(row, shared))),
            None => Ok(None),
        }
    }

    pub fn get(&self, model: &Model, slot: usize, key: &str) -> SafeStoreResult<Value> {
        let object = self.check_live(slot)?;
        if model.attribute(&object.entity, key).is_none() {
            return Err(SafeStoreError::fetch(StoreError::UnknownKey {
                entity: object.entity.clone(),
                key: key.to_string(),
            }));
        }
        Ok(object.values.get(key).cloned().unwrap_or_default())
    }

    /// Assigns an attribute; a rejected assignment fails the next save.
    pub fn set(&mut self, model: &Model, slot: usize, key: &str, value: Value) {
        if let Err(err) = self.try_set(model, slot, key, value) {
            debug!("event=set module=context status=error error={err}");
            self.rejected.push(err);
        }
    }

    fn try_set(&mut self, model: &Model, slot: usize, key: &str, value: Value) -> StoreResult<()> {
        let object = &mut self.slots[slot];
        let attribute = model
            .attribute(&object.entity, key)
            .ok_or_else(|| StoreError::UnknownKey {
                entity: object.entity.clone(),
                key: key.to_string(),
            })?;
        let value = attribute.kind.coerce(value).map_err(|reason| {
            StoreError::Validation(format!("`{}.{key}`: {reason}", object.entity))
        })?;
        if object.values.get(key) != Some(&value) {
            object.values.insert(key.to_string(), value);
            object.dirty.insert(key.to_string());
        }
        Ok(())
    }

    /// Target slot of a to-one relationship, faulting it in when needed.
    pub fn related(
        &mut self,
        model: &Model,
        shared: &SharedContext,
        slot: usize,
        key: &str,
    ) -> SafeStoreResult<Option<usize>> {
        let object = self.check_live(slot)?;
        if model.relationship(&object.entity, key).is_none() {
            return Err(SafeStoreError::fetch(StoreError::UnknownKey {
                entity: object.entity.clone(),
                key: key.to_string(),
            }));
        }
        let target = self.resolve_target(shared, slot, key).map_err(SafeStoreError::fetch)?;
        Ok(target.filter(|&target| {
            !matches!(
                self.slots[target].status,
                SlotStatus::Removed | SlotStatus::Deleted
            )
        }))
    }

    fn resolve_target(
        &mut self,
        shared: &SharedContext,
        slot: usize,
        key: &str,
    ) -> StoreResult<Option<usize>> {
        match self.slots[slot].relations.get(key).cloned().flatten() {
            None => Ok(None),
            Some(RelationTarget::Slot(target)) => Ok(Some(target)),
            Some(RelationTarget::Fault(row_key)) => {
                let target = self.materialize(shared, &row_key)?;
                self.slots[slot]
                    .relations
                    .insert(key.to_string(), target.map(RelationTarget::Slot));
                Ok(target)
            }
        }
    }

    /// Points `key` of `slot` at `target`, maintaining the inverse.
    pub fn set_related(
        &mut self,
        model: &Model,
        shared: &SharedContext,
        slot: usize,
        key: &str,
        target: Option<usize>,
    ) {
        if let Err(err) = self.try_set_related(model, shared, slot, key, target) {
            debug!("event=set_related module=context status=error error={err}");
            self.rejected.push(err);
        }
    }

    fn try_set_related(
        &mut self,
        model: &Model,
        shared: &SharedContext,
        slot: usize,
        key: &str,
        target: Option<usize>,
    ) -> StoreResult<()> {
        let known = |index: usize| index < self.slots.len();
        if !known(slot) || !target.map_or(true, known) {
            return Err(StoreError::Validation(
                "related object belongs to another context".to_string(),
            ));
        }
        let entity = self.slots[slot].entity.clone();
        let relationship = model
            .relationship(&entity, key)
            .ok_or_else(|| StoreError::UnknownKey {
                entity: entity.clone(),
                key: key.to_string(),
            })?
            .clone();
        if let Some(target) = target {
            let target_entity = &self.slots[target].entity;
            let fits = model
                .lineage(target_entity)
                .iter()
                .any(|ancestor| ancestor.name == relationship.destination);
            if !fits || self.slots[target].status == SlotStatus::Removed {
                return Err(StoreError::Validation(format!(
                    "`{entity}.{key}` cannot point at `{target_entity}`"
                )));
            }
        }

        let previous = self.resolve_target(shared, slot, key)?;
        if previous == target {
            return Ok(());
        }
        self.assign(slot, key, target);

        if let Some(inverse) = relationship.inverse.as_deref() {
            if let Some(previous) = previous {
                if self.resolve_target(shared, previous, inverse)? == Some(slot) {
                    self.assign(previous, inverse, None);
                }
            }
            if let Some(target) = target {
                if let Some(owner) = self.resolve_target(shared, target, inverse)? {
                    if owner != slot {
                        self.assign(owner, key, None);
                    }
                }
                self.assign(target, inverse, Some(slot));
            }
        }
        Ok(())
    }

    fn assign(&mut self, slot: usize, key: &str, target: Option<usize>) {
        let object = &mut self.slots[slot];
        object
            .relations
            .insert(key.to_string(), target.map(RelationTarget::Slot));
        object.dirty.insert(key.to_string());
    }

    /// Marks `slot` deleted and clears every reference to it.
    pub fn delete(&mut self, slot: usize) -> SafeStoreResult<()> {
        let status = self.check_live(slot)?.status;
        let deleted_key = self.slots[slot].key.clone();

        for (index, object) in self.slots.iter_mut().enumerate() {
            if index == slot {
                continue;
            }
            let mut cleared = Vec::new();
            for (name, target) in object.relations.iter_mut() {
                let points_here = match target {
                    Some(RelationTarget::Slot(target)) => *target == slot,
                    Some(RelationTarget::Fault(key)) => deleted_key.as_ref() == Some(key),
                    None => false,
                };
                if points_here {
                    *target = None;
                    cleared.push(name.clone());
                }
            }
            object.dirty.extend(cleared);
        }

        self.slots[slot].status = match status {
            SlotStatus::Inserted => SlotStatus::Removed,
            _ => SlotStatus::Deleted,
        };
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        !self.rejected.is_empty()
            || self.slots.iter().any(|object| match object.status {
                SlotStatus::Inserted | SlotStatus::Deleted => true,
                SlotStatus::Persisted => !object.dirty.is_empty(),
                SlotStatus::Removed => false,
            })
    }

    /// Validates staged work and turns it into a change set.
    pub fn collect_changes(&mut self, model: &Model) -> StoreResult<ChangeSet> {
        if !self.rejected.is_empty() {
            let mut rejected = std::mem::take(&mut self.rejected);
            return Err(rejected.swap_remove(0));
        }

        let mut changes = ChangeSet::default();
        for (index, object) in self.slots.iter().enumerate() {
            match object.status {
                SlotStatus::Inserted => {
                    let root = model
                        .root_name(&object.entity)
                        .ok_or_else(|| {
                            StoreError::Validation(format!("unknown entity `{}`", object.entity))
                        })?
                        .to_string();
                    let mut attributes = Vec::new();
                    for attribute in model.attributes_of(&object.entity) {
                        let value = object.values.get(&attribute.name).cloned().unwrap_or_default();
                        if value.is_null() && !attribute.optional {
                            return Err(required(&object.entity, &attribute.name));
                        }
                        attributes.push((attribute.name.clone(), value));
                    }
                    let relations = model
                        .relationships_of(&object.entity)
                        .into_iter()
                        .map(|relationship| {
                            (
                                relationship.name.clone(),
                                self.rel_ref(object, &relationship.name),
                            )
                        })
                        .collect();
                    changes.inserts.push(InsertChange {
                        slot: index,
                        entity: object.entity.clone(),
                        root,
                        attributes,
                        relations,
                    });
                }
                SlotStatus::Persisted if !object.dirty.is_empty() => {
                    let Some(key) = object.key.clone() else {
                        continue;
                    };
                    let mut attributes = Vec::new();
                    let mut relations = Vec::new();
                    let mut dirty: Vec<&String> = object.dirty.iter().collect();
                    dirty.sort();
                    for name in dirty {
                        if let Some(attribute) = model.attribute(&object.entity, name) {
                            let value = object.values.get(name).cloned().unwrap_or_default();
                            if value.is_null() && !attribute.optional {
                                return Err(required(&object.entity, name));
                            }
                            attributes.push((name.clone(), value));
                        } else if model.relationship(&object.entity, name).is_some() {
                            relations.push((name.clone(), self.rel_ref(object, name)));
                        }
                    }
                    changes.updates.push(UpdateChange {
                        slot: index,
                        key,
                        attributes,
                        relations,
                    });
                }
                SlotStatus::Deleted => {
                    if let Some(key) = object.key.clone() {
                        changes.deletes.push(DeleteChange { slot: index, key });
                    }
                }
                SlotStatus::Persisted | SlotStatus::Removed => {}
            }
        }
        Ok(changes)
    }

    fn rel_ref(&self, object: &ObjectSlot, name: &str) -> Option<RelRef> {
        match object.relations.get(name)?.as_ref()? {
            RelationTarget::Slot(index) => {
                let target = &self.slots[*index];
                match target.status {
                    SlotStatus::Inserted => Some(RelRef::Inserted(*index)),
                    SlotStatus::Persisted => target.key.clone().map(RelRef::Persisted),
                    SlotStatus::Deleted | SlotStatus::Removed => None,
                }
            }
            RelationTarget::Fault(key) => {
                match self.by_key.get(key).map(|&slot| self.slots[slot].status) {
                    Some(SlotStatus::Deleted | SlotStatus::Removed) => None,
                    _ => Some(RelRef::Persisted(key.clone())),
                }
            }
        }
    }

    /// Applies the outcome of a successful save.
    pub fn did_save(&mut self, changes: &SavedSlots, assigned: Vec<Assigned>) {
        for Assigned {
            slot,
            key,
            object_id,
        } in assigned
        {
            let object = &mut self.slots[slot];
            object.key = Some(key.clone());
            object.object_id = Some(object_id);
            object.status = SlotStatus::Persisted;
            object.dirty.clear();
            self.by_key.insert(key, slot);
        }
        for &slot in &changes.updated {
            self.slots[slot].dirty.clear();
        }
        for &slot in &changes.deleted {
            let object = &mut self.slots[slot];
            object.status = SlotStatus::Removed;
            object.dirty.clear();
            if let Some(key) = &object.key {
                self.by_key.remove(key);
            }
        }
    }
}

fn required(entity: &str, attribute: &str) -> StoreError {
    StoreError::Validation(format!("`{entity}.{attribute}` is required"))
}

/// Slots touched by a change set, kept for [`ContextState::did_save`].
#[derive(Debug, Default)]
pub(crate) struct SavedSlots {
    updated: Vec<usize>,
    deleted: Vec<usize>,
}

impl From<&ChangeSet> for SavedSlots {
    fn from(changes: &ChangeSet) -> Self {
        Self {
            updated: changes.updates.iter().map(|update| update.slot).collect(),
            deleted: changes.deletes.iter().map(|delete| delete.slot).collect(),
        }
    }
}

/// Saves `state` into its shared context and commits the shared context.
///
/// Runs under the shared save lock so a failing commit only discards the
/// changes of this child.
pub(crate) fn save_propagating(shared: &SharedContext, state: &mut ContextState) -> SafeStoreResult<()> {
    let _guard = shared.save_guard();
    let changes = state
        .collect_changes(shared.model())
        .map_err(SafeStoreError::FailSave)?;
    if changes.is_empty() {
        shared.save().map_err(SafeStoreError::FailSave)?;
        return Ok(());
    }

    let saved = SavedSlots::from(&changes);
    let assigned = shared.merge(changes).map_err(SafeStoreError::FailSave)?;
    shared.save().map_err(SafeStoreError::FailSave)?;
    state.did_save(&saved, assigned);
    Ok(())
}

pub(crate) struct ChildInner {
    pub shared: Arc<SharedContext>,
    pub queue: SerialQueue,
    pub state: Mutex<ContextState>,
}

/// Short-lived unit of work parented to a [`SharedContext`].
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct ChildContext {
    pub(crate) inner: Arc<ChildInner>,
}

impl std::fmt::Debug for ChildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildContext")
            .field("queue", &self.inner.queue.label())
            .finish()
    }
}

impl ChildContext {
    pub(crate) fn new(shared: Arc<SharedContext>, priority: QueuePriority) -> Self {
        let label = format!("safestore.child.{}", shared.model().name);
        Self {
            inner: Arc::new(ChildInner {
                shared,
                queue: SerialQueue::new(label, priority),
                state: Mutex::new(ContextState::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ChildInner>) -> Self {
        Self { inner }
    }

    pub fn shared(&self) -> &Arc<SharedContext> {
        &self.inner.shared
    }

    /// Whether this context holds unsaved work.
    ///
    /// Fails with `FailGetContext` when called from inside this context's
    /// own work.
    pub fn has_changes(&self) -> SafeStoreResult<bool> {
        self.perform(|_, state| Ok(state.has_changes()))
    }

    pub(crate) fn queue(&self) -> &SerialQueue {
        &self.inner.queue
    }

    /// Runs `f` on this context's queue with exclusive access to its state.
    ///
    /// Re-entering from inside `f` (e.g. through an object handle used in a
    /// mutation callback) fails with `FailGetContext`.
    pub(crate) fn perform<R>(
        &self,
        f: impl FnOnce(&SharedContext, &mut ContextState) -> SafeStoreResult<R>,
    ) -> SafeStoreResult<R> {
        self.inner.queue.dispatch_sync(|| {
            let mut state = self
                .inner
                .state
                .try_lock()
                .ok_or(SafeStoreError::FailGetContext)?;
            f(&self.inner.shared, &mut state)
        })
    }
}
