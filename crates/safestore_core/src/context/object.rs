//! Handles to objects living in a child context.
//!
//! A [`ManagedObject`] holds a weak reference to its context; once every
//! strong owner (operation result, [`Attached`](crate::Attached) value or
//! cloned [`ChildContext`]) is gone, every access fails with
//! `FailGetContext` instead of touching freed state.

use super::child::{save_propagating, ChildInner, ContextState, SlotStatus};
use super::{ChildContext, SharedContext};
use crate::config::{Concurrency, OutputThread};
use crate::error::{SafeStoreError, SafeStoreResult};
use crate::model::{EntityType, ObjectId, Value};
use crate::operation::Operation;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Typed handle to one object of entity `T`.
pub struct ManagedObject<T: EntityType> {
    context: Weak<ChildInner>,
    slot: usize,
    _entity: PhantomData<fn() -> T>,
}

impl<T: EntityType> Clone for ManagedObject<T> {
    fn clone(&self) -> Self {
        Self {
            context: Weak::clone(&self.context),
            slot: self.slot,
            _entity: PhantomData,
        }
    }
}

impl<T: EntityType> fmt::Debug for ManagedObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject")
            .field("entity", &T::ENTITY_NAME)
            .field("slot", &self.slot)
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl<T: EntityType> ManagedObject<T> {
    pub(crate) fn new(context: &ChildContext, slot: usize) -> Self {
        Self::from_weak(Arc::downgrade(&context.inner), slot)
    }

    fn from_weak(context: Weak<ChildInner>, slot: usize) -> Self {
        Self {
            context,
            slot,
            _entity: PhantomData,
        }
    }

    /// Owning context, if it is still alive.
    pub fn context(&self) -> SafeStoreResult<ChildContext> {
        self.context
            .upgrade()
            .map(ChildContext::from_inner)
            .ok_or(SafeStoreError::FailGetContext)
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&SharedContext, &mut ContextState) -> SafeStoreResult<R>,
    ) -> SafeStoreResult<R> {
        self.context()?.perform(f)
    }

    /// Current value of attribute `key`.
    pub fn get(&self, key: &str) -> SafeStoreResult<Value> {
        self.with_state(|shared, state| state.get(shared.model(), self.slot, key))
    }

    pub fn text(&self, key: &str) -> SafeStoreResult<Option<String>> {
        Ok(self.get(key)?.as_str().map(str::to_owned))
    }

    pub fn integer(&self, key: &str) -> SafeStoreResult<Option<i64>> {
        Ok(self.get(key)?.as_i64())
    }

    pub fn double(&self, key: &str) -> SafeStoreResult<Option<f64>> {
        Ok(self.get(key)?.as_f64())
    }

    pub fn boolean(&self, key: &str) -> SafeStoreResult<Option<bool>> {
        Ok(self.get(key)?.as_bool())
    }

    pub fn binary(&self, key: &str) -> SafeStoreResult<Option<Vec<u8>>> {
        Ok(self.get(key)?.as_bytes().map(<[u8]>::to_vec))
    }

    /// Stages a new value for `key`.
    ///
    /// Unknown keys and type mismatches are reported by the next save.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> SafeStoreResult<()> {
        let value = value.into();
        self.with_state(|shared, state| {
            state.check_live(self.slot)?;
            state.set(shared.model(), self.slot, key, value);
            Ok(())
        })
    }

    /// Object referenced by to-one relationship `key`.
    pub fn related<C: EntityType>(&self, key: &str) -> SafeStoreResult<Option<ManagedObject<C>>> {
        let target = self.with_state(|shared, state| {
            let Some(target) = state.related(shared.model(), shared, self.slot, key)? else {
                return Ok(None);
            };
            let entity = state
                .slot(target)
                .map(|object| object.entity.as_str())
                .unwrap_or_default();
            let fits = shared
                .model()
                .lineage(entity)
                .iter()
                .any(|ancestor| ancestor.name == C::ENTITY_NAME);
            if !fits {
                return Err(SafeStoreError::fetch(format!(
                    "`{key}` points at `{entity}`, not `{}`",
                    C::ENTITY_NAME
                )));
            }
            Ok(Some(target))
        })?;
        Ok(target.map(|slot| ManagedObject::from_weak(Weak::clone(&self.context), slot)))
    }

    /// Points `key` at `target`, which must live in the same context.
    pub fn set_related<C: EntityType>(
        &self,
        key: &str,
        target: Option<&ManagedObject<C>>,
    ) -> SafeStoreResult<()> {
        if let Some(target) = target {
            if !Weak::ptr_eq(&self.context, &target.context) {
                return Err(SafeStoreError::FailGetContext);
            }
        }
        self.with_state(|shared, state| {
            state.check_live(self.slot)?;
            let target = match target {
                Some(target) => Some(state.check_live(target.slot).map(|_| target.slot)?),
                None => None,
            };
            state.set_related(shared.model(), shared, self.slot, key, target);
            Ok(())
        })
    }

    /// Creates a `C` in this object's context and links it through `key`.
    ///
    /// The new object is saved with the next save of this context.
    pub fn create_related<C: EntityType>(
        &self,
        key: &str,
        mutate: impl FnOnce(&mut Draft<'_, C>),
    ) -> SafeStoreResult<ManagedObject<C>> {
        let slot = self.with_state(|shared, state| {
            state.check_live(self.slot)?;
            let start = state.slot_count();
            let child = state.insert_new(shared.model(), C::ENTITY_NAME)?;
            let failed = {
                let mut draft = Draft::new(shared, state, child);
                mutate(&mut draft);
                draft.create_failed
            };
            if failed {
                state.discard_from(start);
                return Err(SafeStoreError::FailCreate);
            }
            state.set_related(shared.model(), shared, self.slot, key, Some(child));
            Ok(child)
        })?;
        Ok(ManagedObject::from_weak(Weak::clone(&self.context), slot))
    }

    /// Permanent identifier; `None` until the object was saved.
    pub fn object_id(&self) -> SafeStoreResult<Option<ObjectId>> {
        self.with_state(|_, state| Ok(state.check_live(self.slot)?.object_id.clone()))
    }

    /// Concrete entity name, which may be a sub-entity of `T`.
    pub fn entity_name(&self) -> SafeStoreResult<String> {
        self.with_state(|_, state| Ok(state.check_live(self.slot)?.entity.clone()))
    }

    /// Whether this object carries unsaved work.
    pub fn has_changes(&self) -> SafeStoreResult<bool> {
        self.with_state(|_, state| {
            let object = state.check_live(self.slot)?;
            Ok(match object.status {
                SlotStatus::Inserted | SlotStatus::Deleted => true,
                _ => !object.dirty.is_empty(),
            })
        })
    }

    /// Whether the owning context is gone or the object was deleted.
    pub fn is_detached(&self) -> bool {
        match self.context.upgrade() {
            None => true,
            Some(inner) => ChildContext::from_inner(inner)
                .perform(|_, state| Ok(state.check_live(self.slot).is_err()))
                .unwrap_or(true),
        }
    }

    /// Saves the owning context and propagates the save to its shared context.
    pub fn save(&self) -> Operation<()> {
        self.prepare(|context, slot| {
            context.perform(|shared, state| {
                state.check_live(slot)?;
                save_propagating(shared, state)
            })
        })
    }

    /// Deletes this object, then saves like [`ManagedObject::save`].
    pub fn delete(&self) -> Operation<()> {
        self.prepare(|context, slot| {
            context.perform(|shared, state| {
                state.delete(slot)?;
                save_propagating(shared, state)
            })
        })
    }

    fn prepare(
        &self,
        job: impl FnOnce(&ChildContext, usize) -> SafeStoreResult<()> + Send + 'static,
    ) -> Operation<()> {
        match self.context() {
            Ok(context) => {
                let slot = self.slot;
                Operation::new(
                    context,
                    Concurrency::default(),
                    OutputThread::default(),
                    move |context| job(context, slot),
                )
            }
            Err(err) => Operation::failed(err),
        }
    }
}

/// Reference to an object created inside the same mutation callback.
pub struct ObjectRef<C: EntityType> {
    slot: usize,
    _entity: PhantomData<fn() -> C>,
}

impl<C: EntityType> ObjectRef<C> {
    fn new(slot: usize) -> Self {
        Self {
            slot,
            _entity: PhantomData,
        }
    }
}

impl<C: EntityType> Clone for ObjectRef<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: EntityType> Copy for ObjectRef<C> {}

impl<C: EntityType> fmt::Debug for ObjectRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef<{}>({})", C::ENTITY_NAME, self.slot)
    }
}

/// Mutable view of a freshly inserted object, handed to creation callbacks.
///
/// Runs while its context is locked: do not use [`ManagedObject`] handles of
/// the same context from inside the callback.
pub struct Draft<'a, T: EntityType> {
    shared: &'a SharedContext,
    state: &'a mut ContextState,
    slot: usize,
    create_failed: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, T: EntityType> Draft<'a, T> {
    pub(crate) fn new(shared: &'a SharedContext, state: &'a mut ContextState, slot: usize) -> Self {
        Self {
            shared,
            state,
            slot,
            create_failed: false,
            _entity: PhantomData,
        }
    }

    pub(crate) fn create_failed(&self) -> bool {
        self.create_failed
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.state
            .set(self.shared.model(), self.slot, key, value.into());
        self
    }

    /// Current value of `key`, or `None` for unknown keys.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.get(self.shared.model(), self.slot, key).ok()
    }

    pub fn set_related<C: EntityType>(&mut self, key: &str, target: Option<ObjectRef<C>>) -> &mut Self {
        let target = target.map(|target| target.slot);
        self.state
            .set_related(self.shared.model(), self.shared, self.slot, key, target);
        self
    }

    /// Inserts a `C`, fills it through `mutate` and links it through `key`.
    ///
    /// Returns `None` when `C` is not part of the model; the surrounding
    /// create then fails with `FailCreate`.
    pub fn create_related<C: EntityType>(
        &mut self,
        key: &str,
        mutate: impl FnOnce(&mut Draft<'_, C>),
    ) -> Option<ObjectRef<C>> {
        let child = match self.state.insert_new(self.shared.model(), C::ENTITY_NAME) {
            Ok(child) => child,
            Err(_) => {
                self.create_failed = true;
                return None;
            }
        };
        let failed = {
            let mut draft = Draft::<C>::new(self.shared, &mut *self.state, child);
            mutate(&mut draft);
            draft.create_failed
        };
        self.create_failed |= failed;
        self.state
            .set_related(self.shared.model(), self.shared, self.slot, key, Some(child));
        Some(ObjectRef::new(child))
    }

    pub fn object_ref(&self) -> ObjectRef<T> {
        ObjectRef::new(self.slot)
    }
}
