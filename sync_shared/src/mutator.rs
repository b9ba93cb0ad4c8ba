//! Security-gated mutator.
//!
//! The only inbound mutation entry point. An update is checked in full before
//! anything is written: every path must resolve, every field must be permitted
//! by the caller's context and every payload must decode. Only then is the
//! entity locked and the fields applied in message order.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    entity::EntityRecord,
    error::{SyncError, SyncResult},
    message::UpdateMessage,
    notify::ChangeNotifier,
    path::FieldPath,
    registry::TypeTag,
    security::{FieldTarget, SecurityContext},
    store::EntityStore,
    value::{decode_value, FieldValue},
};

/// Applies inbound update messages to a store.
#[derive(Clone)]
pub struct SecurityGatedMutator {
    store: Arc<EntityStore>,
    notifier: ChangeNotifier,
}

impl SecurityGatedMutator {
    pub fn new(store: Arc<EntityStore>, notifier: ChangeNotifier) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Validates `msg` against `ctx` and applies it atomically.
    ///
    /// On any error the entity is left exactly as it was.
    pub fn apply_update(&self, msg: &UpdateMessage, ctx: &dyn SecurityContext) -> SyncResult<()> {
        let registry = self.store.registry();
        registry.type_descriptor(msg.type_tag)?;

        let mut resolved = Vec::with_capacity(msg.fields.len());
        for field in &msg.fields {
            resolved.push(registry.resolve_path(msg.type_tag, &field.path)?);
        }

        // A write replaces everything below the addressed path, so members
        // with a stricter category of their own are checked as well.
        for r in &resolved {
            let guarded = r.guarded_members();
            let checks = std::iter::once((&r.path, r.category))
                .chain(guarded.iter().map(|(path, category)| (path, *category)));
            for (path, category) in checks {
                let target = FieldTarget {
                    type_tag: msg.type_tag,
                    id: msg.id,
                    path,
                    category,
                };
                if !ctx.permits(&target) {
                    warn!(
                        caller = %ctx.describe(),
                        type_tag = %msg.type_tag,
                        id = %msg.id,
                        path = %path,
                        "Update denied"
                    );
                    return Err(SyncError::Authorization {
                        type_tag: msg.type_tag,
                        id: msg.id,
                        path: path.clone(),
                    });
                }
            }
        }

        let mut decoded = Vec::with_capacity(msg.fields.len());
        for (field, r) in msg.fields.iter().zip(&resolved) {
            let value = decode_value(r.kind, &field.payload).map_err(|e| SyncError::MalformedPayload {
                path: field.path.clone(),
                reason: e.to_string(),
            })?;
            decoded.push((&field.path, value));
        }

        if decoded.is_empty() {
            // Nothing to write; still report a missing entity.
            self.store.get_record(msg.type_tag, msg.id)?;
            return Ok(());
        }

        self.store.mutate(msg.type_tag, msg.id, |record| {
            for (path, value) in decoded {
                write_path(record, msg.type_tag, path, value)?;
            }
            Ok(())
        })?;

        debug!(
            type_tag = %msg.type_tag,
            id = %msg.id,
            fields = msg.fields.len(),
            "Update applied"
        );
        self.notifier.publish(msg.type_tag, msg.id, msg.paths());
        Ok(())
    }
}

/// Writes `value` at `path`. Nested paths rewrite the enclosing top-level
/// field with the member or element replaced.
fn write_path(
    record: &mut dyn EntityRecord,
    type_tag: TypeTag,
    path: &FieldPath,
    value: FieldValue,
) -> SyncResult<()> {
    let unknown = || SyncError::UnknownPath {
        type_tag,
        path: path.clone(),
    };
    let head = path.head().ok_or_else(unknown)?;
    let value = if path.rest().is_empty() {
        value
    } else {
        let mut top = record.read_field(head).ok_or_else(unknown)?;
        // List index beyond the current length.
        if !top.set_at(path.rest(), value) {
            return Err(unknown());
        }
        top
    };
    record
        .write_field(head, value)
        .map_err(|e| SyncError::MalformedPayload {
            path: path.clone(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    use crate::{
        entity::SyncEntity,
        registry::{FieldKind, FieldMaskRegistry},
        math::Vec3,
        model::{self, avatar, Avatar},
        security::{CapabilityToken, DenyAll, FieldCategory, Grant, SystemContext},
        serializer::UpdateSerializer,
        store::EntityId,
    };

    fn setup() -> (Arc<EntityStore>, SecurityGatedMutator, UpdateSerializer) {
        let registry = Arc::new(model::bootstrap_registry().unwrap());
        let store = Arc::new(EntityStore::new(registry.clone()));
        let mutator = SecurityGatedMutator::new(store.clone(), ChangeNotifier::new(16));
        (store, mutator, UpdateSerializer::new(registry))
    }

    #[test]
    fn serialized_update_round_trips_through_apply() {
        let (store, mutator, ser) = setup();
        store.insert(Avatar::new(EntityId(1), "Ann")).unwrap();

        let mut source = Avatar::new(EntityId(1), "Ann");
        source.position = Vec3::new(4.0, 5.0, 6.0);
        source.skills.cooking = 9;
        for mask in [model::AVATAR_POSITION, model::AVATAR_SKILLS] {
            for msg in ser.serialize_update(mask, &source, EntityId(1)).unwrap() {
                mutator.apply_update(&msg, &SystemContext).unwrap();
            }
        }

        let av = store.get::<Avatar>(EntityId(1)).unwrap();
        assert_eq!(av.position, Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(av.skills.cooking, 9);
        assert_eq!(av.skill_total(), 9);
    }

    #[test]
    fn denied_update_leaves_entity_untouched() {
        let (store, mutator, ser) = setup();
        let before = store.insert(Avatar::new(EntityId(1), "Ann")).unwrap();
        let mut source = Avatar::new(EntityId(1), "Ann");
        source.budget = 99;
        let msg = ser
            .serialize_update(model::AVATAR_BUDGET, &source, EntityId(1))
            .unwrap()
            .remove(0);

        let err = mutator.apply_update(&msg, &DenyAll).unwrap_err();
        assert!(matches!(err, SyncError::Authorization { .. }));
        let after = store.get::<Avatar>(EntityId(1)).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn one_denied_field_rejects_the_whole_message() {
        let (store, mutator, _) = setup();
        store.insert(Avatar::new(EntityId(1), "Ann")).unwrap();
        let token = CapabilityToken::new("player-1").with_grant(Grant::entity(
            Avatar::TYPE_TAG,
            EntityId(1),
            FieldCategory::PROFILE,
        ));

        let mut msg = UpdateMessage::new(Avatar::TYPE_TAG, EntityId(1));
        msg.push(FieldPath::field(avatar::PRIVACY_MODE), Bytes::from_static(&[1]));
        msg.push(FieldPath::field(avatar::BUDGET), Bytes::from_static(&[0, 0, 0, 50]));

        let err = mutator.apply_update(&msg, &token).unwrap_err();
        assert_eq!(
            err,
            SyncError::Authorization {
                type_tag: Avatar::TYPE_TAG,
                id: EntityId(1),
                path: FieldPath::field(avatar::BUDGET),
            }
        );
        assert_eq!(store.get::<Avatar>(EntityId(1)).unwrap().privacy_mode, 0);

        msg.fields.pop();
        mutator.apply_update(&msg, &token).unwrap();
        assert_eq!(store.get::<Avatar>(EntityId(1)).unwrap().privacy_mode, 1);
    }

    #[test]
    fn parent_write_needs_every_member_category() {
        // Same avatar schema, except position.y is server-owned.
        let mut fields = model::avatar::fields();
        for f in fields.iter_mut().filter(|f| f.id == avatar::POSITION) {
            if let FieldKind::Struct(members) = &mut f.kind {
                for m in members.iter_mut().filter(|m| m.id == avatar::POS_Y) {
                    m.category = FieldCategory::SYSTEM;
                }
            }
        }
        let mut b = FieldMaskRegistry::builder();
        b.register_entity::<Avatar>("Avatar", fields);
        let store = Arc::new(EntityStore::new(Arc::new(b.seal().unwrap())));
        let mutator = SecurityGatedMutator::new(store.clone(), ChangeNotifier::new(4));
        let before = store.insert(Avatar::new(EntityId(1), "Ann")).unwrap();
        let token = CapabilityToken::new("mover").with_grant(Grant::entity(
            Avatar::TYPE_TAG,
            EntityId(1),
            FieldCategory::MOTION,
        ));

        let y = Bytes::copy_from_slice(&99.0f32.to_be_bytes());
        let mut member = UpdateMessage::new(Avatar::TYPE_TAG, EntityId(1));
        member.push([avatar::POSITION, avatar::POS_Y].into(), y.clone());
        assert!(matches!(
            mutator.apply_update(&member, &token),
            Err(SyncError::Authorization { .. })
        ));

        let mut whole = BytesMut::new();
        for v in [1.0f32, 99.0, 3.0] {
            whole.extend_from_slice(&v.to_be_bytes());
        }
        let mut parent = UpdateMessage::new(Avatar::TYPE_TAG, EntityId(1));
        parent.push(FieldPath::field(avatar::POSITION), whole.freeze());
        assert_eq!(
            mutator.apply_update(&parent, &token).unwrap_err(),
            SyncError::Authorization {
                type_tag: Avatar::TYPE_TAG,
                id: EntityId(1),
                path: [avatar::POSITION, avatar::POS_Y].into(),
            }
        );
        let after = store.get::<Avatar>(EntityId(1)).unwrap();
        assert!(Arc::ptr_eq(&before, &after));

        // x on its own only needs motion.
        let mut x = UpdateMessage::new(Avatar::TYPE_TAG, EntityId(1));
        x.push([avatar::POSITION, avatar::POS_X].into(), y);
        mutator.apply_update(&x, &token).unwrap();
        assert_eq!(store.get::<Avatar>(EntityId(1)).unwrap().position, Vec3::new(99.0, 0.0, 0.0));
    }

    #[test]
    fn malformed_payload_applies_nothing() {
        let (store, mutator, _) = setup();
        store.insert(Avatar::new(EntityId(1), "Ann")).unwrap();
        let mut msg = UpdateMessage::new(Avatar::TYPE_TAG, EntityId(1));
        msg.push(FieldPath::field(avatar::PRIVACY_MODE), Bytes::from_static(&[2]));
        msg.push(FieldPath::field(avatar::BUDGET), Bytes::from_static(&[0, 1]));

        let err = mutator.apply_update(&msg, &SystemContext).unwrap_err();
        assert!(matches!(err, SyncError::MalformedPayload { .. }));
        assert_eq!(store.get::<Avatar>(EntityId(1)).unwrap().privacy_mode, 0);
    }

    #[test]
    fn nested_and_indexed_writes() {
        let (store, mutator, _) = setup();
        let mut av = Avatar::new(EntityId(1), "Ann");
        av.bookmarks = vec![10, 20];
        store.insert(av).unwrap();

        let mut msg = UpdateMessage::new(Avatar::TYPE_TAG, EntityId(1));
        msg.push([avatar::POSITION, avatar::POS_Y].into(), Bytes::copy_from_slice(&7.5f32.to_be_bytes()));
        msg.push([avatar::BOOKMARKS, 1].into(), Bytes::from_static(&[0, 0, 0, 21]));
        mutator.apply_update(&msg, &SystemContext).unwrap();

        let av = store.get::<Avatar>(EntityId(1)).unwrap();
        assert_eq!(av.position, Vec3::new(0.0, 7.5, 0.0));
        assert_eq!(av.bookmarks, vec![10, 21]);

        let mut past_end = UpdateMessage::new(Avatar::TYPE_TAG, EntityId(1));
        past_end.push([avatar::BOOKMARKS, 5].into(), Bytes::from_static(&[0, 0, 0, 1]));
        assert!(matches!(
            mutator.apply_update(&past_end, &SystemContext),
            Err(SyncError::UnknownPath { .. })
        ));
    }

    #[test]
    fn registry_and_store_misses_surface_unmodified() {
        let (_, mutator, _) = setup();
        let mut msg = UpdateMessage::new(TypeTag(77), EntityId(1));
        msg.push(FieldPath::field(1), Bytes::new());
        assert_eq!(
            mutator.apply_update(&msg, &SystemContext).unwrap_err(),
            SyncError::UnknownType(TypeTag(77))
        );

        let mut msg = UpdateMessage::new(Avatar::TYPE_TAG, EntityId(8));
        msg.push(FieldPath::field(avatar::PRIVACY_MODE), Bytes::from_static(&[1]));
        assert!(mutator.apply_update(&msg, &SystemContext).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn applied_updates_are_announced() {
        let (store, mutator, _) = setup();
        store.insert(Avatar::new(EntityId(3), "Cy")).unwrap();
        let mut rx = mutator.notifier().subscribe();

        let mut msg = UpdateMessage::new(Avatar::TYPE_TAG, EntityId(3));
        msg.push(FieldPath::field(avatar::PRIVACY_MODE), Bytes::from_static(&[1]));
        mutator.apply_update(&msg, &SystemContext).unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.id, EntityId(3));
        assert_eq!(ev.paths, vec![FieldPath::field(avatar::PRIVACY_MODE)]);
    }
}
