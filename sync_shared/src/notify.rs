//! Change notifications.
//!
//! Every applied update publishes one [`EntityChanged`] on a broadcast
//! channel. Slow receivers lag and drop old events; publishing never blocks a
//! writer.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use crate::{path::FieldPath, registry::TypeTag, store::EntityId};

/// An entity was mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChanged {
    pub type_tag: TypeTag,
    pub id: EntityId,
    /// Paths written, in application order.
    pub paths: Vec<FieldPath>,
    pub at: DateTime<Utc>,
}

/// Fan-out of [`EntityChanged`] events.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<EntityChanged>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityChanged> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publishes a change. Having no receivers is not an error.
    pub fn publish(&self, type_tag: TypeTag, id: EntityId, paths: Vec<FieldPath>) {
        let event = EntityChanged {
            type_tag,
            id,
            paths,
            at: Utc::now(),
        };
        if self.tx.send(event).is_err() {
            trace!(%type_tag, %id, "No change listeners");
        }
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receivers_see_published_changes() {
        let notifier = ChangeNotifier::new(4);
        let mut rx = notifier.subscribe();
        let before = Utc::now();
        notifier.publish(TypeTag(1), EntityId(3), vec![FieldPath::field(5)]);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.type_tag, TypeTag(1));
        assert_eq!(ev.id, EntityId(3));
        assert_eq!(ev.paths, vec![FieldPath::field(5)]);
        assert!(ev.at >= before);
    }

    #[test]
    fn publishing_without_receivers_is_fine() {
        let notifier = ChangeNotifier::default();
        notifier.publish(TypeTag(1), EntityId(1), vec![]);
        assert_eq!(notifier.receiver_count(), 0);
    }
}
