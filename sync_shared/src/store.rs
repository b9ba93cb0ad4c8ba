//! Entity store.
//!
//! Live entities keyed by `(TypeTag, EntityId)`. Readers get `Arc` snapshots
//! that stay pointer-identical until the next successful mutation. Writers
//! take an exclusive per-entity lock, clone the current record, apply their
//! changes to the clone and swap it in, so a failed write leaves nothing
//! behind and readers never observe a half-applied update. Readers only
//! contend with the pointer swap, never with a writer's closure.
//!
//! Locking is per entity: the map itself is sharded (`dashmap`) and only
//! held long enough to clone the slot handle.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    entity::{downcast_arc, EntityRecord, SyncEntity},
    error::{SyncError, SyncResult},
    registry::{FieldMaskRegistry, TypeRef, TypeTag},
};

/// Numeric entity key, unique within a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Key = (TypeTag, EntityId);

struct EntitySlot {
    /// Held for the whole of a mutation; serializes writers. Guards the
    /// retired flag, so a writer that looked the slot up before `retire`
    /// cannot publish into it afterwards.
    writer: Mutex<bool>,
    /// Held only to clone or swap the snapshot pointer.
    current: RwLock<Arc<dyn EntityRecord>>,
}

/// Anything that can hand out current entity snapshots, possibly after a
/// remote fetch.
#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn fetch(&self, type_tag: TypeTag, id: EntityId) -> SyncResult<Arc<dyn EntityRecord>>;
}

/// Typed storage with per-entity locking.
pub struct EntityStore {
    registry: Arc<FieldMaskRegistry>,
    entities: DashMap<Key, Arc<EntitySlot>>,
}

impl EntityStore {
    pub fn new(registry: Arc<FieldMaskRegistry>) -> Self {
        Self {
            registry,
            entities: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<FieldMaskRegistry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, type_tag: TypeTag, id: EntityId) -> bool {
        self.entities.contains_key(&(type_tag, id))
    }

    /// Ids of live entities of a type, ascending.
    pub fn ids_of(&self, type_tag: TypeTag) -> Vec<EntityId> {
        let mut ids: Vec<_> = self
            .entities
            .iter()
            .filter(|e| e.key().0 == type_tag)
            .map(|e| e.key().1)
            .collect();
        ids.sort();
        ids
    }

    /// Registers a native entity.
    pub fn insert<T: SyncEntity>(&self, mut entity: T) -> SyncResult<Arc<T>> {
        entity.refresh_derived();
        let typed = Arc::new(entity);
        self.insert_shared(typed.clone())?;
        Ok(typed)
    }

    /// Registers a type-erased entity. Its type must be registered.
    pub fn insert_record(&self, mut record: Box<dyn EntityRecord>) -> SyncResult<Arc<dyn EntityRecord>> {
        record.refresh_derived();
        self.insert_shared(Arc::from(record))
    }

    fn insert_shared(&self, record: Arc<dyn EntityRecord>) -> SyncResult<Arc<dyn EntityRecord>> {
        let type_tag = record.type_tag();
        let id = record.id();
        self.registry.type_descriptor(type_tag)?;

        match self.entities.entry((type_tag, id)) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SyncError::AlreadyExists { type_tag, id })
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(Arc::new(EntitySlot {
                    writer: Mutex::new(false),
                    current: RwLock::new(record.clone()),
                }));
                info!(%type_tag, %id, "Entity registered");
                Ok(record)
            }
        }
    }

    /// Removes an entity and returns its last snapshot.
    pub fn retire(&self, type_tag: TypeTag, id: EntityId) -> SyncResult<Arc<dyn EntityRecord>> {
        let (_, slot) = self
            .entities
            .remove(&(type_tag, id))
            .ok_or(SyncError::NotFound { type_tag, id })?;
        // Wait for an in-flight writer to finish before handing back the record.
        let mut retired = slot.writer.lock();
        *retired = true;
        let last = slot.current.read().clone();
        info!(%type_tag, %id, "Entity retired");
        Ok(last)
    }

    fn slot(&self, type_tag: TypeTag, id: EntityId) -> SyncResult<Arc<EntitySlot>> {
        self.entities
            .get(&(type_tag, id))
            .map(|s| s.value().clone())
            .ok_or(SyncError::NotFound { type_tag, id })
    }

    /// Current snapshot of an entity, by runtime type tag.
    pub fn get_record(&self, type_tag: TypeTag, id: EntityId) -> SyncResult<Arc<dyn EntityRecord>> {
        self.registry.type_descriptor(type_tag)?;
        let slot = self.slot(type_tag, id)?;
        let current = slot.current.read().clone();
        Ok(current)
    }

    /// Current snapshot of a native entity.
    pub fn get<T: SyncEntity>(&self, id: EntityId) -> SyncResult<Arc<T>> {
        let record = self.get_record(T::TYPE_TAG, id)?;
        let found = record.type_tag();
        downcast_arc::<T>(record).ok_or(SyncError::TypeMismatch {
            expected: T::TYPE_TAG,
            found,
        })
    }

    /// Batch lookup. Results follow `ids` order; a missing id yields
    /// `Err(NotFound)` in its slot without failing the batch.
    pub fn get_many<T: SyncEntity>(&self, ids: &[EntityId]) -> Vec<SyncResult<Arc<T>>> {
        ids.iter().map(|id| self.get::<T>(*id)).collect()
    }

    /// Lookup when the type is only known at runtime (tag, mask or native
    /// type id). Dispatches through the registry's tables.
    pub fn get_dynamic(&self, type_ref: TypeRef, id: EntityId) -> SyncResult<Arc<dyn EntityRecord>> {
        let tag = self.registry.type_for(type_ref)?.tag;
        self.get_record(tag, id)
    }

    pub fn get_many_dynamic(
        &self,
        type_ref: TypeRef,
        ids: &[EntityId],
    ) -> SyncResult<Vec<SyncResult<Arc<dyn EntityRecord>>>> {
        let tag = self.registry.type_for(type_ref)?.tag;
        Ok(ids.iter().map(|id| self.get_record(tag, *id)).collect())
    }

    /// Copy-on-write mutation under the entity's exclusive lock.
    ///
    /// `f` works on a private clone; the clone replaces the live record only
    /// if `f` succeeds. Returns `f`'s result and the new snapshot.
    pub fn mutate<R, F>(&self, type_tag: TypeTag, id: EntityId, f: F) -> SyncResult<(R, Arc<dyn EntityRecord>)>
    where
        F: FnOnce(&mut (dyn EntityRecord + 'static)) -> SyncResult<R>,
    {
        let slot = self.slot(type_tag, id)?;
        self.mutate_slot(&slot, type_tag, id, f)
    }

    fn mutate_slot<R, F>(
        &self,
        slot: &EntitySlot,
        type_tag: TypeTag,
        id: EntityId,
        f: F,
    ) -> SyncResult<(R, Arc<dyn EntityRecord>)>
    where
        F: FnOnce(&mut (dyn EntityRecord + 'static)) -> SyncResult<R>,
    {
        let retired = slot.writer.lock();
        if *retired {
            return Err(SyncError::NotFound { type_tag, id });
        }
        let mut working = slot.current.read().clone_record();
        let out = f(working.as_mut())?;
        working.refresh_derived();
        let next: Arc<dyn EntityRecord> = Arc::from(working);
        *slot.current.write() = next.clone();
        debug!(%type_tag, %id, "Entity mutated");
        Ok((out, next))
    }

    /// Typed writer path; same locking discipline as [`EntityStore::mutate`].
    pub fn write<T, R, F>(&self, id: EntityId, f: F) -> SyncResult<(R, Arc<T>)>
    where
        T: SyncEntity,
        F: FnOnce(&mut T) -> R,
    {
        let (out, next) = self.mutate(T::TYPE_TAG, id, |record| {
            let found = record.type_tag();
            let typed = record.downcast_mut::<T>().ok_or(SyncError::TypeMismatch {
                expected: T::TYPE_TAG,
                found,
            })?;
            Ok(f(typed))
        })?;
        let found = next.type_tag();
        let typed = downcast_arc::<T>(next).ok_or(SyncError::TypeMismatch {
            expected: T::TYPE_TAG,
            found,
        })?;
        Ok((out, typed))
    }
}

#[async_trait]
impl EntitySource for EntityStore {
    async fn fetch(&self, type_tag: TypeTag, id: EntityId) -> SyncResult<Arc<dyn EntityRecord>> {
        self.get_record(type_tag, id)
    }
}
