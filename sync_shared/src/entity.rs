//! Entity records.
//!
//! Every stored entity implements [`EntityRecord`], the type-erased surface the
//! store, serializer and mutator work through. Native types additionally
//! implement [`SyncEntity`] so typed call sites can downcast.

use std::{any::Any, fmt, sync::Arc};

use thiserror::Error;

use crate::{registry::TypeTag, store::EntityId, value::FieldValue};

/// Failure writing a top-level field into an entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("field {0} does not exist")]
    UnknownField(u32),

    #[error("field {field} expects {expected}")]
    WrongShape { field: u32, expected: &'static str },
}

/// `Any` access for trait objects.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Boxed clone for copy-on-write mutation.
pub trait CloneRecord {
    fn clone_record(&self) -> Box<dyn EntityRecord>;
}

impl<T: EntityRecord + Clone> CloneRecord for T {
    fn clone_record(&self) -> Box<dyn EntityRecord> {
        Box::new(self.clone())
    }
}

/// Type-erased entity surface.
pub trait EntityRecord: AsAny + CloneRecord + fmt::Debug {
    fn type_tag(&self) -> TypeTag;

    fn id(&self) -> EntityId;

    /// Current value of a top-level field.
    fn read_field(&self, field: u32) -> Option<FieldValue>;

    /// Replaces a top-level field.
    fn write_field(&mut self, field: u32, value: FieldValue) -> Result<(), WriteError>;

    /// Recomputes derived state after a successful write.
    fn refresh_derived(&mut self) {}
}

/// A native entity type with a fixed wire tag.
pub trait SyncEntity: EntityRecord + Clone + Sized {
    const TYPE_TAG: TypeTag;

    /// Default instance used when a replica first learns of an id.
    fn spawn(id: EntityId) -> Self;
}

impl dyn EntityRecord {
    pub fn is<T: SyncEntity>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: SyncEntity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: SyncEntity>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Downcasts a shared snapshot to its native type.
pub fn downcast_arc<T: SyncEntity>(record: Arc<dyn EntityRecord>) -> Option<Arc<T>> {
    AsAny::into_any_arc(record).downcast::<T>().ok()
}

/// Reads a possibly nested value: the top-level field, then `rest` segments.
pub fn read_path(record: &dyn EntityRecord, head: u32, rest: &[u32]) -> Option<FieldValue> {
    let top = record.read_field(head)?;
    if rest.is_empty() {
        return Some(top);
    }
    top.at(rest).cloned()
}

/// Shorthand for a shape mismatch on `field`.
pub fn wrong_shape(field: u32, expected: &'static str) -> WriteError {
    WriteError::WrongShape { field, expected }
}
