//! Error types for the sync core.
//!
//! Registry and store misses surface to callers unmodified. Nothing in this
//! crate retries; redelivery is a transport concern.

use thiserror::Error;

use crate::{
    path::FieldPath,
    registry::{MaskId, TypeTag},
    store::EntityId,
};

/// Errors produced by the store, serializer and mutator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// No live entity with that (type, id).
    #[error("entity {type_tag}/{id} not found")]
    NotFound { type_tag: TypeTag, id: EntityId },

    /// Insert of a key that is already live.
    #[error("entity {type_tag}/{id} already exists")]
    AlreadyExists { type_tag: TypeTag, id: EntityId },

    /// Type tag not registered. Indicates schema drift.
    #[error("type {0} is not registered")]
    UnknownType(TypeTag),

    /// `UnknownType` for a native selector: the Rust type was never
    /// registered, so there is no tag to report.
    #[error("native type {0} is not registered")]
    UnknownNativeType(&'static str),

    /// A path segment is unregistered or indexes past a leaf.
    #[error("path {path} does not resolve on type {type_tag}")]
    UnknownPath { type_tag: TypeTag, path: FieldPath },

    #[error("mask {0} is not registered")]
    UnknownMask(MaskId),

    /// Runtime type of a value does not match what the caller declared.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: TypeTag, found: TypeTag },

    /// Security context denies mutation of a field.
    #[error("not authorized to write {path} on entity {type_tag}/{id}")]
    Authorization {
        type_tag: TypeTag,
        id: EntityId,
        path: FieldPath,
    },

    /// Payload bytes do not decode per the field's declared encoding.
    #[error("malformed payload for {path}: {reason}")]
    MalformedPayload { path: FieldPath, reason: String },

    /// Frame body is not a valid update message.
    #[error("malformed update message: {0}")]
    MalformedMessage(String),
}

impl SyncError {
    /// Registry misses mean sender and receiver disagree on the protocol.
    pub fn is_schema_drift(&self) -> bool {
        matches!(
            self,
            SyncError::UnknownType(_)
                | SyncError::UnknownNativeType(_)
                | SyncError::UnknownPath { .. }
                | SyncError::UnknownMask(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }
}

/// Registry build validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("type tag {0} registered twice")]
    DuplicateType(TypeTag),

    #[error("field {field} declared twice on type {type_tag}")]
    DuplicateField { type_tag: TypeTag, field: u32 },

    #[error("mask {0} registered twice")]
    DuplicateMask(MaskId),

    #[error("mask {mask} refers to unregistered type {type_tag}")]
    MaskTypeUnknown { mask: MaskId, type_tag: TypeTag },

    #[error("mask {mask} path {path} does not resolve")]
    MaskPathUnresolved { mask: MaskId, path: FieldPath },

    #[error("mask {0} has no fields")]
    EmptyMask(MaskId),

    #[error("field {field} on type {type_tag} is a list of zero-width elements")]
    ZeroWidthElement { type_tag: TypeTag, field: u32 },
}

pub type SyncResult<T> = Result<T, SyncError>;
