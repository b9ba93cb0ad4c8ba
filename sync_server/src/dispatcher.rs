//! In-process topic dispatcher.
//!
//! Subscribers are bounded `mpsc` queues keyed by [`ClientId`]. A topic is one
//! entity, `(TypeTag, EntityId)`; every message addressed at that entity goes
//! to everyone subscribed to it. A full queue drops the message for that
//! subscriber only. Inbound updates are applied with the sending connection's
//! security context; repeated authorization failures disconnect it.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use sync_shared::{
    error::SyncError,
    message::UpdateMessage,
    registry::TypeTag,
    security::SecurityContext,
    service::DataService,
    store::EntityId,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Topic = (TypeTag, EntityId);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("client {0:?} is not connected")]
    UnknownClient(ClientId),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

struct Subscriber {
    tx: mpsc::Sender<UpdateMessage>,
    ctx: Arc<dyn SecurityContext>,
    topics: BTreeSet<Topic>,
    violations: u32,
}

/// Result of handling one inbound update.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Applied and echoed to this many other subscribers.
    Applied { delivered: usize },
    /// Dropped; the connection stays up.
    Rejected(SyncError),
    /// Dropped and the connection was closed for repeated violations.
    Disconnected(SyncError),
    /// Sender is not (or no longer) connected.
    UnknownClient,
}

/// Fans update messages out to topic subscribers.
pub struct TopicDispatcher {
    service: DataService,
    subscribers: HashMap<ClientId, Subscriber>,
    topics: HashMap<Topic, BTreeSet<ClientId>>,
    queue_capacity: usize,
    max_violations: u32,
}

impl TopicDispatcher {
    pub fn new(service: DataService, queue_capacity: usize, max_violations: u32) -> Self {
        Self {
            service,
            subscribers: HashMap::new(),
            topics: HashMap::new(),
            queue_capacity: queue_capacity.max(1),
            max_violations: max_violations.max(1),
        }
    }

    pub fn service(&self) -> &DataService {
        &self.service
    }

    pub fn client_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_connected(&self, client: ClientId) -> bool {
        self.subscribers.contains_key(&client)
    }

    /// Registers a connection. `ctx` governs every update it sends.
    pub fn connect(&mut self, ctx: Arc<dyn SecurityContext>) -> (ClientId, mpsc::Receiver<UpdateMessage>) {
        let id = ClientId::new_unique();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        info!(client_id = ?id, caller = %ctx.describe(), "Subscriber connected");
        self.subscribers.insert(
            id,
            Subscriber {
                tx,
                ctx,
                topics: BTreeSet::new(),
                violations: 0,
            },
        );
        (id, rx)
    }

    /// Drops a connection and all its subscriptions.
    pub fn disconnect(&mut self, client: ClientId) -> bool {
        let Some(sub) = self.subscribers.remove(&client) else {
            return false;
        };
        for topic in sub.topics {
            self.forget(topic, client);
        }
        info!(client_id = ?client, "Subscriber disconnected");
        true
    }

    /// Subscribes `client` to one entity and queues the entity's full state as
    /// the first message on that topic. The same message is returned.
    pub async fn subscribe(
        &mut self,
        client: ClientId,
        type_tag: TypeTag,
        id: EntityId,
    ) -> Result<UpdateMessage, DispatchError> {
        if !self.subscribers.contains_key(&client) {
            return Err(DispatchError::UnknownClient(client));
        }
        let initial = self.service.serialize_path(&[type_tag.0, id.0]).await?;
        let sub = self
            .subscribers
            .get_mut(&client)
            .ok_or(DispatchError::UnknownClient(client))?;
        sub.topics.insert((type_tag, id));
        if let Err(e) = sub.tx.try_send(initial.clone()) {
            warn!(client_id = ?client, %type_tag, %id, error = %e, "Initial state not queued");
        }
        self.topics.entry((type_tag, id)).or_default().insert(client);
        debug!(client_id = ?client, %type_tag, %id, "Subscribed");
        Ok(initial)
    }

    pub fn unsubscribe(&mut self, client: ClientId, type_tag: TypeTag, id: EntityId) -> bool {
        let removed = self
            .subscribers
            .get_mut(&client)
            .is_some_and(|s| s.topics.remove(&(type_tag, id)));
        if removed {
            self.forget((type_tag, id), client);
        }
        removed
    }

    fn forget(&mut self, topic: Topic, client: ClientId) {
        if let Some(set) = self.topics.get_mut(&topic) {
            set.remove(&client);
            if set.is_empty() {
                self.topics.remove(&topic);
            }
        }
    }

    /// Queues `msg` for every subscriber of its entity. Returns how many
    /// queues accepted it.
    pub fn publish(&mut self, msg: &UpdateMessage) -> usize {
        self.publish_except(msg, None)
    }

    fn publish_except(&mut self, msg: &UpdateMessage, except: Option<ClientId>) -> usize {
        let Some(targets) = self.topics.get(&(msg.type_tag, msg.id)) else {
            return 0;
        };
        let mut delivered = 0;
        let mut closed = Vec::new();
        for client in targets.iter().copied().filter(|c| Some(*c) != except) {
            let Some(sub) = self.subscribers.get(&client) else {
                continue;
            };
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(client_id = ?client, type_tag = %msg.type_tag, id = %msg.id, "Subscriber queue full, dropping update");
                }
                Err(TrySendError::Closed(_)) => closed.push(client),
            }
        }
        for client in closed {
            self.disconnect(client);
        }
        debug!(type_tag = %msg.type_tag, id = %msg.id, delivered, "Update fanned out");
        delivered
    }

    /// Applies an update sent by `from` and echoes it to the other
    /// subscribers of the entity.
    pub fn handle_inbound(&mut self, from: ClientId, msg: &UpdateMessage) -> InboundOutcome {
        let Some(sub) = self.subscribers.get(&from) else {
            return InboundOutcome::UnknownClient;
        };
        let ctx = sub.ctx.clone();

        match self.service.apply_update(msg, ctx.as_ref()) {
            Ok(()) => InboundOutcome::Applied {
                delivered: self.publish_except(msg, Some(from)),
            },
            Err(err @ SyncError::Authorization { .. }) => self.flag_violation(from, err),
            Err(err) => {
                debug!(client_id = ?from, error = %err, "Inbound update rejected");
                InboundOutcome::Rejected(err)
            }
        }
    }

    /// Decodes a frame body and handles it as [`TopicDispatcher::handle_inbound`].
    pub fn handle_frame(&mut self, from: ClientId, body: &[u8]) -> InboundOutcome {
        match UpdateMessage::decode(body) {
            Ok(msg) => self.handle_inbound(from, &msg),
            Err(err) => {
                warn!(client_id = ?from, error = %err, "Undecodable frame");
                InboundOutcome::Rejected(err)
            }
        }
    }

    fn flag_violation(&mut self, client: ClientId, err: SyncError) -> InboundOutcome {
        let Some(sub) = self.subscribers.get_mut(&client) else {
            return InboundOutcome::Rejected(err);
        };
        sub.violations += 1;
        let violations = sub.violations;
        warn!(client_id = ?client, violations, error = %err, "Authorization violation");
        if violations >= self.max_violations {
            self.disconnect(client);
            InboundOutcome::Disconnected(err)
        } else {
            InboundOutcome::Rejected(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sync_shared::{
        entity::SyncEntity,
        model::{self, avatar, Avatar},
        notify::ChangeNotifier,
        path::FieldPath,
        security::{DenyAll, SystemContext},
    };

    fn dispatcher(capacity: usize) -> TopicDispatcher {
        let registry = Arc::new(model::bootstrap_registry().unwrap());
        let service = DataService::new(registry, ChangeNotifier::default());
        service.insert(Avatar::new(EntityId(1), "Ann")).unwrap();
        TopicDispatcher::new(service, capacity, 2)
    }

    fn privacy(value: u8) -> UpdateMessage {
        let mut msg = UpdateMessage::new(Avatar::TYPE_TAG, EntityId(1));
        msg.push(FieldPath::field(avatar::PRIVACY_MODE), Bytes::copy_from_slice(&[value]));
        msg
    }

    #[tokio::test]
    async fn subscribe_queues_full_state_first() {
        let mut d = dispatcher(8);
        let (client, mut rx) = d.connect(Arc::new(SystemContext));
        let initial = d.subscribe(client, Avatar::TYPE_TAG, EntityId(1)).await.unwrap();
        assert_eq!(initial.fields.len(), 8);
        assert_eq!(rx.recv().await.unwrap(), initial);

        let missing = d.subscribe(client, Avatar::TYPE_TAG, EntityId(2)).await.unwrap_err();
        assert!(matches!(missing, DispatchError::Sync(ref e) if e.is_not_found()));

        d.disconnect(client);
        assert_eq!(
            d.subscribe(client, Avatar::TYPE_TAG, EntityId(1)).await.unwrap_err(),
            DispatchError::UnknownClient(client)
        );
        assert_eq!(d.handle_inbound(client, &privacy(1)), InboundOutcome::UnknownClient);
    }

    #[tokio::test]
    async fn accepted_updates_are_echoed_to_others_only() {
        let mut d = dispatcher(8);
        let (writer, mut writer_rx) = d.connect(Arc::new(SystemContext));
        let (reader, mut reader_rx) = d.connect(Arc::new(DenyAll));
        d.subscribe(writer, Avatar::TYPE_TAG, EntityId(1)).await.unwrap();
        d.subscribe(reader, Avatar::TYPE_TAG, EntityId(1)).await.unwrap();
        writer_rx.recv().await.unwrap();
        reader_rx.recv().await.unwrap();

        let outcome = d.handle_frame(writer, &privacy(1).encode().unwrap());
        assert_eq!(outcome, InboundOutcome::Applied { delivered: 1 });
        assert_eq!(reader_rx.recv().await.unwrap(), privacy(1));
        assert!(writer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn repeated_violations_disconnect() {
        let mut d = dispatcher(8);
        let (client, _rx) = d.connect(Arc::new(DenyAll));
        assert!(matches!(
            d.handle_inbound(client, &privacy(1)),
            InboundOutcome::Rejected(SyncError::Authorization { .. })
        ));
        assert!(matches!(
            d.handle_inbound(client, &privacy(1)),
            InboundOutcome::Disconnected(_)
        ));
        assert!(!d.is_connected(client));
        let av = d.service().get::<Avatar>(EntityId(1)).unwrap();
        assert_eq!(av.privacy_mode, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let mut d = dispatcher(1);
        let (client, mut rx) = d.connect(Arc::new(SystemContext));
        d.subscribe(client, Avatar::TYPE_TAG, EntityId(1)).await.unwrap();
        // Queue already holds the initial state.
        assert_eq!(d.publish(&privacy(1)), 0);
        rx.recv().await.unwrap();
        assert_eq!(d.publish(&privacy(1)), 1);
    }

    #[tokio::test]
    async fn disconnect_clears_topics() {
        let mut d = dispatcher(8);
        let (client, rx) = d.connect(Arc::new(SystemContext));
        d.subscribe(client, Avatar::TYPE_TAG, EntityId(1)).await.unwrap();
        assert!(d.unsubscribe(client, Avatar::TYPE_TAG, EntityId(1)));
        assert!(!d.unsubscribe(client, Avatar::TYPE_TAG, EntityId(1)));

        d.subscribe(client, Avatar::TYPE_TAG, EntityId(1)).await.unwrap();
        drop(rx);
        assert_eq!(d.publish(&privacy(1)), 0);
        assert!(!d.is_connected(client));
    }
}
