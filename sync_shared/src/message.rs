//! Update messages.
//!
//! An update message addresses one entity and carries an ordered list of
//! (field path, payload) pairs. Payloads are opaque here; their schema is the
//! registry's declared encoding for the path.
//!
//! Frame body layout (big-endian):
//!
//! ```text
//! u8  version
//! u32 type tag
//! u32 entity id
//! u16 field count
//! per field:
//!   u8  segment count, u32 x segments
//!   u32 payload length, payload bytes
//! ```
//!
//! Framing and transmission belong to the dispatcher.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::{SyncError, SyncResult},
    path::{DotPath, FieldPath},
    registry::TypeTag,
    store::EntityId,
};

/// Wire version of the frame body.
pub const UPDATE_MESSAGE_VERSION: u8 = 1;

/// One addressed field and its encoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub path: FieldPath,
    pub payload: Bytes,
}

/// Wire-ready partial (or full) update for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMessage {
    pub type_tag: TypeTag,
    pub id: EntityId,
    pub fields: Vec<FieldUpdate>,
}

impl UpdateMessage {
    pub fn new(type_tag: TypeTag, id: EntityId) -> Self {
        Self {
            type_tag,
            id,
            fields: Vec::new(),
        }
    }

    pub fn push(&mut self, path: FieldPath, payload: Bytes) {
        self.fields.push(FieldUpdate { path, payload });
    }

    /// Full topic addresses of every field carried.
    pub fn topics(&self) -> Vec<DotPath> {
        self.fields
            .iter()
            .map(|f| DotPath::new(self.type_tag, self.id, f.path.clone()))
            .collect()
    }

    pub fn paths(&self) -> Vec<FieldPath> {
        self.fields.iter().map(|f| f.path.clone()).collect()
    }

    /// Serializes the frame body.
    pub fn encode(&self) -> SyncResult<Bytes> {
        if self.fields.len() > u16::MAX as usize {
            return Err(SyncError::MalformedMessage(format!(
                "{} fields exceed frame limit",
                self.fields.len()
            )));
        }
        let body_len: usize = self
            .fields
            .iter()
            .map(|f| 5 + f.path.len() * 4 + f.payload.len())
            .sum();
        let mut buf = BytesMut::with_capacity(11 + body_len);
        buf.put_u8(UPDATE_MESSAGE_VERSION);
        buf.put_u32(self.type_tag.0);
        buf.put_u32(self.id.0);
        buf.put_u16(self.fields.len() as u16);
        for field in &self.fields {
            if field.path.len() > u8::MAX as usize {
                return Err(SyncError::MalformedMessage(format!(
                    "path {} too deep",
                    field.path
                )));
            }
            buf.put_u8(field.path.len() as u8);
            for seg in field.path.segments() {
                buf.put_u32(*seg);
            }
            buf.put_u32(field.payload.len() as u32);
            buf.extend_from_slice(&field.payload);
        }
        Ok(buf.freeze())
    }

    /// Parses a frame body produced by [`UpdateMessage::encode`].
    pub fn decode(body: &[u8]) -> SyncResult<Self> {
        let mut buf = body;
        let bad = |what: &str| SyncError::MalformedMessage(what.to_string());

        if buf.remaining() < 11 {
            return Err(bad("header truncated"));
        }
        let version = buf.get_u8();
        if version != UPDATE_MESSAGE_VERSION {
            return Err(SyncError::MalformedMessage(format!(
                "unsupported version {version}"
            )));
        }
        let type_tag = TypeTag(buf.get_u32());
        let id = EntityId(buf.get_u32());
        let count = buf.get_u16();

        let mut msg = UpdateMessage::new(type_tag, id);
        for _ in 0..count {
            if buf.remaining() < 1 {
                return Err(bad("field header truncated"));
            }
            let depth = buf.get_u8() as usize;
            if buf.remaining() < depth * 4 + 4 {
                return Err(bad("path truncated"));
            }
            let segments: Vec<u32> = (0..depth).map(|_| buf.get_u32()).collect();
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(bad("payload truncated"));
            }
            let payload = buf.copy_to_bytes(len);
            msg.push(FieldPath::new(segments), payload);
        }
        if buf.has_remaining() {
            return Err(SyncError::MalformedMessage(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }
        Ok(msg)
    }
}
