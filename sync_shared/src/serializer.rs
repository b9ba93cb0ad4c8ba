//! Update serializer.
//!
//! Turns (mask, value) pairs into partial update messages, and dot paths into
//! full-value messages. Output depends only on the inputs and the registry,
//! so re-serializing an unchanged value yields identical bytes.

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::{
    entity::{read_path, EntityRecord},
    error::{SyncError, SyncResult},
    message::UpdateMessage,
    path::{DotPath, FieldPath},
    registry::{FieldKind, FieldMaskRegistry, MaskId, MaskPacking, TypeTag},
    store::{EntityId, EntitySource},
    value::{encode_value, FieldValue},
};

/// Stateless encoder bound to a sealed registry.
#[derive(Clone)]
pub struct UpdateSerializer {
    registry: Arc<FieldMaskRegistry>,
}

impl UpdateSerializer {
    pub fn new(registry: Arc<FieldMaskRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<FieldMaskRegistry> {
        &self.registry
    }

    /// Encodes the fields named by `mask`, read off `value`, addressed to `id`.
    ///
    /// Paths are emitted in registry order. `PerField` masks yield one message
    /// per path; `Packed` masks yield a single message.
    pub fn serialize_update(
        &self,
        mask: MaskId,
        value: &dyn EntityRecord,
        id: EntityId,
    ) -> SyncResult<Vec<UpdateMessage>> {
        let mask = self.registry.resolve_mask(mask)?;
        let found = value.type_tag();
        if found != mask.type_tag {
            return Err(SyncError::TypeMismatch {
                expected: mask.type_tag,
                found,
            });
        }

        let mut out = Vec::new();
        let mut packed = UpdateMessage::new(mask.type_tag, id);
        for path in &mask.paths {
            let payload = self.encode_at(mask.type_tag, value, path)?;
            match mask.packing {
                MaskPacking::PerField => {
                    let mut msg = UpdateMessage::new(mask.type_tag, id);
                    msg.push(path.clone(), payload);
                    out.push(msg);
                }
                MaskPacking::Packed => packed.push(path.clone(), payload),
            }
        }
        if mask.packing == MaskPacking::Packed {
            out.push(packed);
        }
        trace!(mask = %mask.id, %id, messages = out.len(), "Serialized mask update");
        Ok(out)
    }

    /// Full-state message: every top-level field in id order.
    pub fn serialize_entity(&self, value: &dyn EntityRecord) -> SyncResult<UpdateMessage> {
        let type_tag = value.type_tag();
        let desc = self.registry.type_descriptor(type_tag)?;
        let mut msg = UpdateMessage::new(type_tag, value.id());
        for path in desc.top_level_paths() {
            let payload = self.encode_at(type_tag, value, &path)?;
            msg.push(path, payload);
        }
        Ok(msg)
    }

    /// Resolves `[type, id, field...]`, fetches the entity and encodes the
    /// full current value at that path.
    ///
    /// The path is resolved before any fetch. No entity lock is held across
    /// the fetch; encoding reads the returned snapshot.
    pub async fn serialize_path<S>(&self, source: &S, dot_path: &[u32]) -> SyncResult<UpdateMessage>
    where
        S: EntitySource + ?Sized,
    {
        let topic = DotPath::parse(dot_path)?;
        if topic.is_whole_entity() {
            self.registry.type_descriptor(topic.type_tag)?;
        } else {
            self.registry.resolve_path(topic.type_tag, &topic.field)?;
        }

        let record = source.fetch(topic.type_tag, topic.id).await?;
        if topic.is_whole_entity() {
            return self.serialize_entity(record.as_ref());
        }

        let payload = self.encode_at(topic.type_tag, record.as_ref(), &topic.field)?;
        let mut msg = UpdateMessage::new(topic.type_tag, topic.id);
        msg.push(topic.field, payload);
        Ok(msg)
    }

    fn encode_at(&self, type_tag: TypeTag, value: &dyn EntityRecord, path: &FieldPath) -> SyncResult<Bytes> {
        let resolved = self.registry.resolve_path(type_tag, path)?;
        let unknown = || SyncError::UnknownPath {
            type_tag,
            path: path.clone(),
        };
        let head = path.head().ok_or_else(unknown)?;
        // A list index past the current length resolves in the registry but
        // has no value on this instance.
        let current = read_path(value, head, path.rest()).ok_or_else(unknown)?;
        encode_field(resolved.kind, &current, path)
    }
}

fn encode_field(kind: &FieldKind, value: &FieldValue, path: &FieldPath) -> SyncResult<Bytes> {
    encode_value(kind, value).map_err(|e| SyncError::MalformedPayload {
        path: path.clone(),
        reason: e.to_string(),
    })
}
