//! Field mask registry.
//!
//! The single source of truth mapping entity types to their numeric field
//! paths and named masks. Built once at startup with [`RegistryBuilder`],
//! then sealed into an immutable [`FieldMaskRegistry`] that is shared by
//! `Arc` and read without locking.

use std::{
    any::{type_name, TypeId},
    collections::{HashMap, HashSet},
    fmt,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    entity::{EntityRecord, SyncEntity},
    error::{RegistryError, SyncError, SyncResult},
    path::FieldPath,
    security::FieldCategory,
    store::EntityId,
    value::WireEncoding,
};

/// Wire identifier of an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(pub u32);

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire identifier of a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaskId(pub u32);

impl fmt::Display for MaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shape of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Leaf(WireEncoding),
    /// Named members, in wire order.
    Struct(Vec<FieldDescriptor>),
    /// Homogeneous list; the next path segment is an element index.
    List(Box<FieldKind>),
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Leaf(enc) => enc.name(),
            FieldKind::Struct(_) => "struct",
            FieldKind::List(_) => "list",
        }
    }

    /// Fewest bytes a value of this kind takes on the wire.
    pub fn min_width(&self) -> usize {
        match self {
            FieldKind::Leaf(enc) => enc.min_width(),
            FieldKind::Struct(members) => members.iter().map(|m| m.kind.min_width()).sum(),
            FieldKind::List(_) => 4,
        }
    }
}

/// A registered field (top-level or struct member).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub id: u32,
    pub name: &'static str,
    pub kind: FieldKind,
    /// Empty for members that inherit their parent's category.
    pub category: FieldCategory,
}

impl FieldDescriptor {
    pub fn leaf(id: u32, name: &'static str, enc: WireEncoding, category: FieldCategory) -> Self {
        Self {
            id,
            name,
            kind: FieldKind::Leaf(enc),
            category,
        }
    }

    pub fn structure(
        id: u32,
        name: &'static str,
        members: Vec<FieldDescriptor>,
        category: FieldCategory,
    ) -> Self {
        Self {
            id,
            name,
            kind: FieldKind::Struct(members),
            category,
        }
    }

    pub fn list(id: u32, name: &'static str, elem: FieldKind, category: FieldCategory) -> Self {
        Self {
            id,
            name,
            kind: FieldKind::List(Box::new(elem)),
            category,
        }
    }
}

/// Creates a default instance of a type for a given id.
pub type EntityFactory = fn(EntityId) -> Box<dyn EntityRecord>;

fn spawn_boxed<T: SyncEntity>(id: EntityId) -> Box<dyn EntityRecord> {
    Box::new(T::spawn(id))
}

/// A registered entity type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub tag: TypeTag,
    pub name: &'static str,
    /// Top-level fields sorted by id.
    pub fields: Vec<FieldDescriptor>,
    pub native: Option<TypeId>,
    pub factory: Option<EntityFactory>,
}

impl TypeDescriptor {
    pub fn new(tag: TypeTag, name: &'static str, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            tag,
            name,
            fields,
            native: None,
            factory: None,
        }
    }

    pub fn field(&self, id: u32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Paths of every top-level field in id order.
    pub fn top_level_paths(&self) -> Vec<FieldPath> {
        self.fields.iter().map(|f| FieldPath::field(f.id)).collect()
    }

    /// Materializes a default instance, if the type has a factory.
    pub fn spawn(&self, id: EntityId) -> Option<Box<dyn EntityRecord>> {
        self.factory.map(|f| f(id))
    }
}

/// How a mask's paths are packed into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskPacking {
    /// One message per path.
    #[default]
    PerField,
    /// A single message carrying every path.
    Packed,
}

/// Named, ordered change-set for one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskDescriptor {
    pub id: MaskId,
    pub name: &'static str,
    pub type_tag: TypeTag,
    /// Wire-stable order.
    pub paths: Vec<FieldPath>,
    pub packing: MaskPacking,
}

impl MaskDescriptor {
    pub fn new(id: MaskId, name: &'static str, type_tag: TypeTag, paths: Vec<FieldPath>) -> Self {
        Self {
            id,
            name,
            type_tag,
            paths,
            packing: MaskPacking::PerField,
        }
    }

    pub fn packed(mut self) -> Self {
        self.packing = MaskPacking::Packed;
        self
    }
}

/// Runtime type selector for dynamically-typed lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRef {
    /// Wire type tag, e.g. just decoded off a message.
    Tag(TypeTag),
    /// The type a mask belongs to.
    Mask(MaskId),
    /// A native Rust type registered with [`RegistryBuilder::register_entity`].
    Native(TypeId, &'static str),
}

impl TypeRef {
    pub fn native<T: 'static>() -> Self {
        TypeRef::Native(TypeId::of::<T>(), type_name::<T>())
    }
}

/// Result of resolving a field path.
#[derive(Debug, Clone)]
pub struct ResolvedField<'a> {
    pub type_tag: TypeTag,
    pub path: FieldPath,
    /// The top-level field the path starts at.
    pub field: &'a FieldDescriptor,
    /// Shape of the addressed value.
    pub kind: &'a FieldKind,
    /// Innermost non-empty category along the path.
    pub category: FieldCategory,
}

impl ResolvedField<'_> {
    /// Members below the addressed value that declare their own category,
    /// with the path each is reached by. Writing the addressed value
    /// overwrites all of them. Members inside list elements are reported
    /// without an index segment, since one write covers every element.
    pub fn guarded_members(&self) -> Vec<(FieldPath, FieldCategory)> {
        let mut out = Vec::new();
        collect_guarded(self.kind, &self.path, &mut out);
        out
    }
}

fn collect_guarded(kind: &FieldKind, at: &FieldPath, out: &mut Vec<(FieldPath, FieldCategory)>) {
    match kind {
        FieldKind::Leaf(_) => {}
        FieldKind::List(elem) => collect_guarded(elem, at, out),
        FieldKind::Struct(members) => {
            for m in members {
                let path = at.child(m.id);
                if !m.category.is_empty() {
                    out.push((path.clone(), m.category));
                }
                collect_guarded(&m.kind, &path, out);
            }
        }
    }
}

/// Collects type and mask registrations before sealing.
#[derive(Default)]
pub struct RegistryBuilder {
    types: Vec<TypeDescriptor>,
    masks: Vec<MaskDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type known only by tag (no native Rust type).
    pub fn register_type(&mut self, desc: TypeDescriptor) -> &mut Self {
        self.types.push(desc);
        self
    }

    /// Registers a native entity type with its factory.
    pub fn register_entity<T: SyncEntity>(
        &mut self,
        name: &'static str,
        fields: Vec<FieldDescriptor>,
    ) -> &mut Self {
        let mut desc = TypeDescriptor::new(T::TYPE_TAG, name, fields);
        desc.native = Some(TypeId::of::<T>());
        desc.factory = Some(spawn_boxed::<T>);
        self.types.push(desc);
        self
    }

    pub fn register_mask(&mut self, mask: MaskDescriptor) -> &mut Self {
        self.masks.push(mask);
        self
    }

    /// Validates and freezes the registry.
    pub fn seal(self) -> Result<FieldMaskRegistry, RegistryError> {
        let mut types: HashMap<TypeTag, TypeDescriptor> = HashMap::new();
        let mut natives: HashMap<TypeId, TypeTag> = HashMap::new();
        for mut desc in self.types {
            if types.contains_key(&desc.tag) {
                return Err(RegistryError::DuplicateType(desc.tag));
            }
            let mut seen = HashSet::new();
            for field in &desc.fields {
                if !seen.insert(field.id) {
                    return Err(RegistryError::DuplicateField {
                        type_tag: desc.tag,
                        field: field.id,
                    });
                }
                check_members(desc.tag, field.id, &field.kind)?;
            }
            desc.fields.sort_by_key(|f| f.id);
            if let Some(native) = desc.native {
                natives.insert(native, desc.tag);
            }
            types.insert(desc.tag, desc);
        }

        let mut registry = FieldMaskRegistry {
            types,
            masks: HashMap::new(),
            natives,
        };

        for mask in self.masks {
            if registry.masks.contains_key(&mask.id) {
                return Err(RegistryError::DuplicateMask(mask.id));
            }
            if !registry.types.contains_key(&mask.type_tag) {
                return Err(RegistryError::MaskTypeUnknown {
                    mask: mask.id,
                    type_tag: mask.type_tag,
                });
            }
            if mask.paths.is_empty() {
                return Err(RegistryError::EmptyMask(mask.id));
            }
            for path in &mask.paths {
                if registry.resolve_path(mask.type_tag, path).is_err() {
                    return Err(RegistryError::MaskPathUnresolved {
                        mask: mask.id,
                        path: path.clone(),
                    });
                }
            }
            registry.masks.insert(mask.id, mask);
        }

        debug!(
            types = registry.types.len(),
            masks = registry.masks.len(),
            "Field mask registry sealed"
        );
        Ok(registry)
    }
}

fn check_members(type_tag: TypeTag, field: u32, kind: &FieldKind) -> Result<(), RegistryError> {
    match kind {
        FieldKind::Leaf(_) => Ok(()),
        FieldKind::List(elem) => {
            // A zero-width element makes a list's count unverifiable on decode.
            if elem.min_width() == 0 {
                return Err(RegistryError::ZeroWidthElement { type_tag, field });
            }
            check_members(type_tag, field, elem)
        }
        FieldKind::Struct(members) => {
            let mut seen = HashSet::new();
            for m in members {
                if !seen.insert(m.id) {
                    return Err(RegistryError::DuplicateField {
                        type_tag,
                        field: m.id,
                    });
                }
                check_members(type_tag, field, &m.kind)?;
            }
            Ok(())
        }
    }
}

/// Immutable type/field/mask lookup tables.
#[derive(Debug)]
pub struct FieldMaskRegistry {
    types: HashMap<TypeTag, TypeDescriptor>,
    masks: HashMap<MaskId, MaskDescriptor>,
    natives: HashMap<TypeId, TypeTag>,
}

impl FieldMaskRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn type_descriptor(&self, tag: TypeTag) -> SyncResult<&TypeDescriptor> {
        self.types.get(&tag).ok_or(SyncError::UnknownType(tag))
    }

    pub fn is_registered(&self, tag: TypeTag) -> bool {
        self.types.contains_key(&tag)
    }

    /// Dispatches a runtime type selector to a registered type.
    pub fn type_for(&self, type_ref: TypeRef) -> SyncResult<&TypeDescriptor> {
        match type_ref {
            TypeRef::Tag(tag) => self.type_descriptor(tag),
            TypeRef::Mask(mask) => {
                let mask = self.resolve_mask(mask)?;
                self.type_descriptor(mask.type_tag)
            }
            TypeRef::Native(id, name) => {
                let tag = self
                    .natives
                    .get(&id)
                    .ok_or(SyncError::UnknownNativeType(name))?;
                self.type_descriptor(*tag)
            }
        }
    }

    pub fn resolve_mask(&self, mask: MaskId) -> SyncResult<&MaskDescriptor> {
        self.masks.get(&mask).ok_or(SyncError::UnknownMask(mask))
    }

    /// Masks registered for a type, ordered by id.
    pub fn masks_for(&self, tag: TypeTag) -> Vec<&MaskDescriptor> {
        let mut out: Vec<_> = self.masks.values().filter(|m| m.type_tag == tag).collect();
        out.sort_by_key(|m| m.id);
        out
    }

    /// Resolves a field path on a type.
    ///
    /// Fails with `UnknownPath` when the path is empty, a segment is not
    /// registered, a list index is applied to a non-list, or the path
    /// continues past a leaf.
    pub fn resolve_path(&self, tag: TypeTag, path: &FieldPath) -> SyncResult<ResolvedField<'_>> {
        let desc = self.type_descriptor(tag)?;
        let unknown = || SyncError::UnknownPath {
            type_tag: tag,
            path: path.clone(),
        };

        let head = path.head().ok_or_else(unknown)?;
        let field = desc.field(head).ok_or_else(unknown)?;
        let mut kind = &field.kind;
        let mut category = field.category;

        for seg in path.rest() {
            kind = match kind {
                FieldKind::Leaf(_) => return Err(unknown()),
                FieldKind::List(elem) => elem.as_ref(),
                FieldKind::Struct(members) => {
                    let member = members.iter().find(|m| m.id == *seg).ok_or_else(unknown)?;
                    if !member.category.is_empty() {
                        category = member.category;
                    }
                    &member.kind
                }
            };
        }

        Ok(ResolvedField {
            type_tag: tag,
            path: path.clone(),
            field,
            kind,
            category,
        })
    }

    /// Registered type tags in ascending order.
    pub fn type_tags(&self) -> Vec<TypeTag> {
        let mut tags: Vec<_> = self.types.keys().copied().collect();
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: TypeTag = TypeTag(9);

    fn builder() -> RegistryBuilder {
        let mut b = RegistryBuilder::new();
        b.register_type(TypeDescriptor::new(
            T,
            "Probe",
            vec![
                FieldDescriptor::leaf(2, "label", WireEncoding::Str, FieldCategory::PROFILE),
                FieldDescriptor::structure(
                    1,
                    "pos",
                    vec![
                        FieldDescriptor::leaf(1, "x", WireEncoding::F32, FieldCategory::empty()),
                        FieldDescriptor::leaf(2, "y", WireEncoding::F32, FieldCategory::SYSTEM),
                    ],
                    FieldCategory::MOTION,
                ),
                FieldDescriptor::list(
                    3,
                    "tags",
                    FieldKind::Leaf(WireEncoding::U32),
                    FieldCategory::SOCIAL,
                ),
            ],
        ));
        b
    }

    #[test]
    fn resolves_nested_and_indexed_paths() {
        let mut b = builder();
        b.register_mask(MaskDescriptor::new(MaskId(1), "pos", T, vec![[1, 1].into(), [1, 2].into()]));
        let reg = b.seal().unwrap();

        let x = reg.resolve_path(T, &[1, 1].into()).unwrap();
        assert_eq!(x.kind, &FieldKind::Leaf(WireEncoding::F32));
        assert_eq!(x.category, FieldCategory::MOTION);

        let y = reg.resolve_path(T, &[1, 2].into()).unwrap();
        assert_eq!(y.category, FieldCategory::SYSTEM);

        let tag = reg.resolve_path(T, &[3, 40].into()).unwrap();
        assert_eq!(tag.kind, &FieldKind::Leaf(WireEncoding::U32));

        // Fields are sorted by id after sealing.
        let ids: Vec<_> = reg.type_descriptor(T).unwrap().fields.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn guarded_members_cover_everything_a_parent_write_replaces() {
        let mut b = builder();
        b.register_type(TypeDescriptor::new(
            TypeTag(10),
            "Roster",
            vec![FieldDescriptor::list(
                1,
                "entries",
                FieldKind::Struct(vec![
                    FieldDescriptor::leaf(1, "label", WireEncoding::Str, FieldCategory::empty()),
                    FieldDescriptor::leaf(2, "rank", WireEncoding::U8, FieldCategory::ECONOMY),
                ]),
                FieldCategory::SOCIAL,
            )],
        ));
        let reg = b.seal().unwrap();

        let pos = reg.resolve_path(T, &[1].into()).unwrap();
        assert_eq!(pos.guarded_members(), vec![(FieldPath::from([1, 2]), FieldCategory::SYSTEM)]);
        let x = reg.resolve_path(T, &[1, 1].into()).unwrap();
        assert!(x.guarded_members().is_empty());

        let entries = reg.resolve_path(TypeTag(10), &[1].into()).unwrap();
        assert_eq!(
            entries.guarded_members(),
            vec![(FieldPath::from([1, 2]), FieldCategory::ECONOMY)]
        );
        let one = reg.resolve_path(TypeTag(10), &[1, 4].into()).unwrap();
        assert_eq!(
            one.guarded_members(),
            vec![(FieldPath::from([1, 4, 2]), FieldCategory::ECONOMY)]
        );
    }

    #[test]
    fn rejects_unknown_segments_and_indexing_past_leaf() {
        let reg = builder().seal().unwrap();
        for bad in [vec![], vec![7], vec![1, 9], vec![2, 0], vec![3, 0, 0]] {
            let err = reg.resolve_path(T, &FieldPath::new(bad)).unwrap_err();
            assert!(matches!(err, SyncError::UnknownPath { .. }), "{err}");
        }
        assert_eq!(
            reg.resolve_path(TypeTag(1), &[1].into()).unwrap_err(),
            SyncError::UnknownType(TypeTag(1))
        );
    }

    #[test]
    fn seal_validates_masks() {
        let mut b = builder();
        b.register_mask(MaskDescriptor::new(MaskId(1), "bad", T, vec![[1, 5].into()]));
        assert!(matches!(
            b.seal(),
            Err(RegistryError::MaskPathUnresolved { .. })
        ));

        let mut b = builder();
        b.register_mask(MaskDescriptor::new(MaskId(1), "a", T, vec![[2].into()]));
        b.register_mask(MaskDescriptor::new(MaskId(1), "b", T, vec![[2].into()]));
        assert_eq!(b.seal().unwrap_err(), RegistryError::DuplicateMask(MaskId(1)));

        let mut b = builder();
        b.register_mask(MaskDescriptor::new(MaskId(4), "x", TypeTag(77), vec![[1].into()]));
        assert!(matches!(b.seal(), Err(RegistryError::MaskTypeUnknown { .. })));
    }

    #[test]
    fn seal_rejects_duplicates() {
        let mut b = builder();
        b.register_type(TypeDescriptor::new(T, "Again", vec![]));
        assert_eq!(b.seal().unwrap_err(), RegistryError::DuplicateType(T));

        let mut b = RegistryBuilder::new();
        b.register_type(TypeDescriptor::new(
            TypeTag(1),
            "Dup",
            vec![
                FieldDescriptor::leaf(1, "a", WireEncoding::U8, FieldCategory::SYSTEM),
                FieldDescriptor::leaf(1, "b", WireEncoding::U8, FieldCategory::SYSTEM),
            ],
        ));
        assert!(matches!(b.seal(), Err(RegistryError::DuplicateField { .. })));
    }

    #[test]
    fn seal_rejects_lists_of_empty_structs() {
        let mut b = RegistryBuilder::new();
        b.register_type(TypeDescriptor::new(
            TypeTag(1),
            "Hollow",
            vec![FieldDescriptor::list(4, "marks", FieldKind::Struct(vec![]), FieldCategory::SOCIAL)],
        ));
        assert_eq!(
            b.seal().unwrap_err(),
            RegistryError::ZeroWidthElement {
                type_tag: TypeTag(1),
                field: 4
            }
        );
    }

    #[test]
    fn mask_type_ref_dispatch() {
        let mut b = builder();
        b.register_mask(MaskDescriptor::new(MaskId(5), "label", T, vec![[2].into()]).packed());
        let reg = b.seal().unwrap();
        assert_eq!(reg.type_for(TypeRef::Mask(MaskId(5))).unwrap().tag, T);
        assert_eq!(
            reg.type_for(TypeRef::Mask(MaskId(6))).unwrap_err(),
            SyncError::UnknownMask(MaskId(6))
        );
        assert!(matches!(
            reg.type_for(TypeRef::native::<String>()),
            Err(SyncError::UnknownNativeType(_))
        ));
    }
}
