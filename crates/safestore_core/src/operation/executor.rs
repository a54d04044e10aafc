//! Create, fetch and remove executors.
//!
//! Each executor runs inside one child context; create finishes with the
//! save-propagation chain.

use crate::config::{FetchConfig, RemoveConfig};
use crate::context::{save_propagating, ChildContext, Draft, FetchSpec, ManagedObject};
use crate::error::{SafeStoreError, SafeStoreResult};
use crate::model::{EntityType, ObjectId};
use log::{debug, error, info};
use std::time::Instant;

/// Inserts one `T`, fills it through `mutate` and saves it.
pub(crate) fn create<T: EntityType>(
    context: &ChildContext,
    mutate: impl FnOnce(&mut Draft<'_, T>),
) -> SafeStoreResult<ManagedObject<T>> {
    let slot = context.perform(|shared, state| {
        let start = state.slot_count();
        let slot = state.insert_new(shared.model(), T::ENTITY_NAME)?;
        let failed = {
            let mut draft = Draft::new(shared, state, slot);
            mutate(&mut draft);
            draft.create_failed()
        };
        if failed {
            state.discard_from(start);
            return Err(SafeStoreError::FailCreate);
        }
        save_propagating(shared, state).inspect_err(|_| state.discard_from(start))?;
        Ok(slot)
    })?;
    debug!("event=create module=operation status=ok entity={}", T::ENTITY_NAME);
    Ok(ManagedObject::new(context, slot))
}

/// Inserts one `T` per item and saves them together.
///
/// Any failure discards the whole batch.
pub(crate) fn create_list<T: EntityType, I>(
    context: &ChildContext,
    items: Vec<I>,
    mut mutate: impl FnMut(&mut Draft<'_, T>, I),
) -> SafeStoreResult<Vec<ManagedObject<T>>> {
    let started_at = Instant::now();
    let count = items.len();
    let slots = context.perform(|shared, state| {
        let start = state.slot_count();
        let mut slots = Vec::with_capacity(count);
        for item in items {
            let slot = match state.insert_new(shared.model(), T::ENTITY_NAME) {
                Ok(slot) => slot,
                Err(err) => {
                    state.discard_from(start);
                    return Err(err);
                }
            };
            let failed = {
                let mut draft = Draft::new(shared, state, slot);
                mutate(&mut draft, item);
                draft.create_failed()
            };
            if failed {
                state.discard_from(start);
                return Err(SafeStoreError::FailCreate);
            }
            slots.push(slot);
        }
        save_propagating(shared, state).inspect_err(|_| state.discard_from(start))?;
        Ok(slots)
    });

    match &slots {
        Ok(_) => info!(
            "event=create_list module=operation status=ok entity={} count={} duration_ms={}",
            T::ENTITY_NAME,
            count,
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=create_list module=operation status=error entity={} count={} error={}",
            T::ENTITY_NAME,
            count,
            err
        ),
    }
    Ok(slots?
        .into_iter()
        .map(|slot| ManagedObject::new(context, slot))
        .collect())
}

/// Runs the query described by `config` and registers the rows in `context`.
pub(crate) fn fetch<T: EntityType>(
    context: &ChildContext,
    config: &FetchConfig,
) -> SafeStoreResult<Vec<ManagedObject<T>>> {
    let spec = FetchSpec {
        entity: T::ENTITY_NAME.to_string(),
        includes_subentities: config.includes_subentities,
        filter: config.filter.clone(),
        sort: config.sort.clone(),
        limit: config.fetch_limit,
        offset: config.fetch_offset,
        batch_size: config.fetch_batch_size,
    };
    let started_at = Instant::now();
    let slots = context.perform(|shared, state| {
        if shared.model().find_entity(T::ENTITY_NAME).is_none() {
            return Err(SafeStoreError::fetch(format!(
                "entity `{}` is not part of model `{}`",
                T::ENTITY_NAME,
                shared.model().name
            )));
        }
        let rows = shared.fetch_rows(&spec).map_err(SafeStoreError::fetch)?;
        Ok(rows
            .into_iter()
            .map(|row| state.register_row(row, shared))
            .collect::<Vec<_>>())
    });

    match &slots {
        Ok(slots) => debug!(
            "event=fetch module=operation status=ok entity={} rows={} duration_ms={}",
            T::ENTITY_NAME,
            slots.len(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=fetch module=operation status=error entity={} error={}",
            T::ENTITY_NAME,
            err
        ),
    }
    Ok(slots?
        .into_iter()
        .map(|slot| ManagedObject::new(context, slot))
        .collect())
}

/// Batch-deletes every `T` matching the filter of `config`.
///
/// Runs directly against the store without loading the objects.
pub(crate) fn remove<T: EntityType>(
    context: &ChildContext,
    config: &RemoveConfig,
) -> SafeStoreResult<Vec<ObjectId>> {
    let filter = config.filter.clone();
    context.perform(|shared, _| {
        shared
            .batch_delete(T::ENTITY_NAME, filter.as_ref())
            .map_err(|err| {
                error!(
                    "event=batch_delete module=operation status=error entity={} error={}",
                    T::ENTITY_NAME,
                    err
                );
                SafeStoreError::FailRemove
            })
    })
}
