//! Replica implementation.
//!
//! A replica mirrors the host's entities from the ordered stream of update
//! messages the dispatcher queues for it. It keeps its own store and mutator
//! over the same registry, so every inbound message goes through the same
//! validation as on the host.
//!
//! An entity the replica has never seen is created only from a full-state
//! message (one carrying every top-level field of its type); partial updates
//! for unknown entities are rejected with `NotFound`.

use std::{collections::BTreeSet, sync::Arc};

use sync_shared::{
    entity::SyncEntity,
    error::{SyncError, SyncResult},
    message::UpdateMessage,
    mutator::SecurityGatedMutator,
    notify::ChangeNotifier,
    registry::FieldMaskRegistry,
    security::{SecurityContext, SystemContext},
    store::{EntityId, EntityStore},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Counters for a drained stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    pub applied: u64,
    pub rejected: u64,
    pub materialized: u64,
}

/// Local mirror of a host's entities.
pub struct Replica {
    store: Arc<EntityStore>,
    mutator: SecurityGatedMutator,
    ctx: Arc<dyn SecurityContext>,
    stats: ReplicaStats,
}

impl Replica {
    /// Replica trusting everything its host sends.
    pub fn new(registry: Arc<FieldMaskRegistry>, notifier: ChangeNotifier) -> Self {
        Self::with_context(registry, notifier, Arc::new(SystemContext))
    }

    /// Replica that checks host updates against `ctx`.
    pub fn with_context(
        registry: Arc<FieldMaskRegistry>,
        notifier: ChangeNotifier,
        ctx: Arc<dyn SecurityContext>,
    ) -> Self {
        let store = Arc::new(EntityStore::new(registry));
        Self {
            mutator: SecurityGatedMutator::new(store.clone(), notifier),
            store,
            ctx,
            stats: ReplicaStats::default(),
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn stats(&self) -> ReplicaStats {
        self.stats
    }

    pub fn get<T: SyncEntity>(&self, id: EntityId) -> SyncResult<Arc<T>> {
        self.store.get(id)
    }

    /// True when `msg` carries every top-level field of its type.
    pub fn is_full_state(&self, msg: &UpdateMessage) -> SyncResult<bool> {
        let desc = self.store.registry().type_descriptor(msg.type_tag)?;
        let carried: BTreeSet<u32> = msg
            .fields
            .iter()
            .filter(|f| f.path.len() == 1)
            .filter_map(|f| f.path.head())
            .collect();
        Ok(desc.fields.iter().all(|f| carried.contains(&f.id)))
    }

    /// Applies one message.
    pub fn apply(&mut self, msg: &UpdateMessage) -> SyncResult<()> {
        let created = self.materialize_if_needed(msg)?;
        match self.mutator.apply_update(msg, self.ctx.as_ref()) {
            Ok(()) => {
                self.stats.applied += 1;
                if created {
                    self.stats.materialized += 1;
                }
                Ok(())
            }
            Err(err) => {
                if created {
                    // Drop the default instance so a bad first message leaves
                    // no trace.
                    if let Err(retire_err) = self.store.retire(msg.type_tag, msg.id) {
                        warn!(
                            type_tag = %msg.type_tag,
                            id = %msg.id,
                            error = %retire_err,
                            "Could not drop materialized entity"
                        );
                    }
                }
                self.stats.rejected += 1;
                Err(err)
            }
        }
    }

    /// Decodes and applies a frame body.
    pub fn apply_frame(&mut self, body: &[u8]) -> SyncResult<()> {
        let msg = UpdateMessage::decode(body).inspect_err(|_| self.stats.rejected += 1)?;
        self.apply(&msg)
    }

    fn materialize_if_needed(&mut self, msg: &UpdateMessage) -> SyncResult<bool> {
        if self.store.contains(msg.type_tag, msg.id) {
            return Ok(false);
        }
        if !self.is_full_state(msg)? {
            self.stats.rejected += 1;
            return Err(SyncError::NotFound {
                type_tag: msg.type_tag,
                id: msg.id,
            });
        }
        let desc = self.store.registry().type_descriptor(msg.type_tag)?;
        let record = desc.spawn(msg.id).ok_or(SyncError::UnknownType(msg.type_tag))?;
        self.store.insert_record(record)?;
        debug!(type_tag = %msg.type_tag, id = %msg.id, "Materialized from full state");
        Ok(true)
    }

    /// Applies messages in arrival order until the sender hangs up. Rejected
    /// messages are logged and skipped.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<UpdateMessage>) -> ReplicaStats {
        while let Some(msg) = rx.recv().await {
            if let Err(err) = self.apply(&msg) {
                warn!(type_tag = %msg.type_tag, id = %msg.id, error = %err, "Replica rejected update");
            }
        }
        info!(
            applied = self.stats.applied,
            rejected = self.stats.rejected,
            materialized = self.stats.materialized,
            "Replica stream closed"
        );
        self.stats
    }
}
