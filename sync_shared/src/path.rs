//! Field paths and topic dot paths.
//!
//! A field path is the stable numeric wire vocabulary for a field inside one
//! entity type. A dot path prefixes it with the type tag and entity id:
//! `[type, id, field, nested...]`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::SyncError, registry::TypeTag, store::EntityId};

/// Ordered sequence of numeric segments addressing a (possibly nested) field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct FieldPath(Vec<u32>);

impl FieldPath {
    pub fn new(segments: Vec<u32>) -> Self {
        FieldPath(segments)
    }

    /// Path naming a single top-level field.
    pub fn field(id: u32) -> Self {
        FieldPath(vec![id])
    }

    pub fn segments(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Top-level field id, if any.
    pub fn head(&self) -> Option<u32> {
        self.0.first().copied()
    }

    /// Segments below the top-level field.
    pub fn rest(&self) -> &[u32] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: u32) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        FieldPath(segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl From<Vec<u32>> for FieldPath {
    fn from(v: Vec<u32>) -> Self {
        FieldPath(v)
    }
}

impl From<&[u32]> for FieldPath {
    fn from(v: &[u32]) -> Self {
        FieldPath(v.to_vec())
    }
}

impl<const N: usize> From<[u32; N]> for FieldPath {
    fn from(v: [u32; N]) -> Self {
        FieldPath(v.to_vec())
    }
}

/// A fully addressed topic: which field of which entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DotPath {
    pub type_tag: TypeTag,
    pub id: EntityId,
    /// Empty when the whole entity is addressed.
    pub field: FieldPath,
}

impl DotPath {
    pub fn new(type_tag: TypeTag, id: EntityId, field: FieldPath) -> Self {
        Self { type_tag, id, field }
    }

    /// Splits raw wire segments into type, id and field path.
    ///
    /// Fewer than two segments cannot address an entity; the result is an
    /// `UnknownPath` against whatever type tag is present (0 when empty).
    pub fn parse(segments: &[u32]) -> Result<Self, SyncError> {
        match segments {
            [type_tag, id, field @ ..] => Ok(DotPath {
                type_tag: TypeTag(*type_tag),
                id: EntityId(*id),
                field: FieldPath::from(field),
            }),
            _ => Err(SyncError::UnknownPath {
                type_tag: TypeTag(segments.first().copied().unwrap_or(0)),
                path: FieldPath::from(segments),
            }),
        }
    }

    pub fn is_whole_entity(&self) -> bool {
        self.field.is_empty()
    }

    /// Flattens back to wire segments.
    pub fn to_segments(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(2 + self.field.len());
        out.push(self.type_tag.0);
        out.push(self.id.0);
        out.extend_from_slice(self.field.segments());
        out
    }
}

impl fmt::Display for DotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_tag, self.id)?;
        if !self.field.is_empty() {
            write!(f, "/{}", self.field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_path_splits_type_id_and_field() {
        let p = DotPath::parse(&[2, 17, 4, 1]).unwrap();
        assert_eq!(p.type_tag, TypeTag(2));
        assert_eq!(p.id, EntityId(17));
        assert_eq!(p.field, FieldPath::from([4, 1]));
        assert_eq!(p.to_segments(), vec![2, 17, 4, 1]);
    }

    #[test]
    fn dot_path_too_short() {
        let err = DotPath::parse(&[2]).unwrap_err();
        assert!(matches!(err, SyncError::UnknownPath { type_tag: TypeTag(2), .. }));
    }

    #[test]
    fn field_path_display() {
        assert_eq!(FieldPath::from([1, 2, 3]).to_string(), "1.2.3");
        assert_eq!(FieldPath::default().to_string(), "<root>");
    }
}
