//! Data service facade.
//!
//! Bundles the store, serializer and mutator behind one handle with the read,
//! outbound and inbound surfaces a host needs. All three share one registry.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{
    entity::{EntityRecord, SyncEntity},
    error::{SyncError, SyncResult},
    message::UpdateMessage,
    mutator::SecurityGatedMutator,
    notify::{ChangeNotifier, EntityChanged},
    registry::{FieldMaskRegistry, MaskId, TypeRef},
    security::SecurityContext,
    serializer::UpdateSerializer,
    store::{EntityId, EntityStore},
};

#[derive(Clone)]
pub struct DataService {
    store: Arc<EntityStore>,
    serializer: UpdateSerializer,
    mutator: SecurityGatedMutator,
}

impl DataService {
    pub fn new(registry: Arc<FieldMaskRegistry>, notifier: ChangeNotifier) -> Self {
        let store = Arc::new(EntityStore::new(registry.clone()));
        Self {
            serializer: UpdateSerializer::new(registry),
            mutator: SecurityGatedMutator::new(store.clone(), notifier),
            store,
        }
    }

    pub fn registry(&self) -> &Arc<FieldMaskRegistry> {
        self.store.registry()
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn serializer(&self) -> &UpdateSerializer {
        &self.serializer
    }

    pub fn changes(&self) -> broadcast::Receiver<EntityChanged> {
        self.mutator.notifier().subscribe()
    }

    pub fn insert<T: SyncEntity>(&self, entity: T) -> SyncResult<Arc<T>> {
        self.store.insert(entity)
    }

    pub fn get<T: SyncEntity>(&self, id: EntityId) -> SyncResult<Arc<T>> {
        self.store.get(id)
    }

    pub fn get_many<T: SyncEntity>(&self, ids: &[EntityId]) -> Vec<SyncResult<Arc<T>>> {
        self.store.get_many(ids)
    }

    pub fn get_dynamic(&self, type_ref: TypeRef, id: EntityId) -> SyncResult<Arc<dyn EntityRecord>> {
        self.store.get_dynamic(type_ref, id)
    }

    pub fn get_many_dynamic(
        &self,
        type_ref: TypeRef,
        ids: &[EntityId],
    ) -> SyncResult<Vec<SyncResult<Arc<dyn EntityRecord>>>> {
        self.store.get_many_dynamic(type_ref, ids)
    }

    pub fn serialize_update(
        &self,
        mask: MaskId,
        value: &dyn EntityRecord,
        id: EntityId,
    ) -> SyncResult<Vec<UpdateMessage>> {
        self.serializer.serialize_update(mask, value, id)
    }

    pub async fn serialize_path(&self, dot_path: &[u32]) -> SyncResult<UpdateMessage> {
        self.serializer.serialize_path(self.store.as_ref(), dot_path).await
    }

    pub fn apply_update(&self, msg: &UpdateMessage, ctx: &dyn SecurityContext) -> SyncResult<()> {
        self.mutator.apply_update(msg, ctx)
    }

    /// Local writer path: mutates `id` under its lock, then serializes `mask`
    /// off the new snapshot for the dispatcher.
    ///
    /// The mask is checked before the write, so an unknown mask or one
    /// belonging to another type changes nothing.
    pub fn update<T, F>(&self, mask: MaskId, id: EntityId, f: F) -> SyncResult<Vec<UpdateMessage>>
    where
        T: SyncEntity,
        F: FnOnce(&mut T),
    {
        let desc = self.registry().resolve_mask(mask)?;
        if desc.type_tag != T::TYPE_TAG {
            return Err(SyncError::TypeMismatch {
                expected: desc.type_tag,
                found: T::TYPE_TAG,
            });
        }
        let paths = desc.paths.clone();
        let ((), next) = self.store.write::<T, _, _>(id, f)?;
        let msgs = self.serializer.serialize_update(mask, next.as_ref(), id)?;
        self.mutator.notifier().publish(T::TYPE_TAG, id, paths);
        Ok(msgs)
    }
}
