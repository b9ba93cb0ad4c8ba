//! Security contexts for inbound updates.
//!
//! A context is passed into every `apply_update` call and never stored on
//! an entity or connection. It answers one question per addressed field:
//! may this caller write it?

use std::collections::BTreeSet;

use crate::{path::FieldPath, registry::TypeTag, store::EntityId};

bitflags::bitflags! {
    /// Field categories used to group permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldCategory: u32 {
        const PROFILE = 1 << 0;   // Player-editable presentation
        const MOTION = 1 << 1;    // Position / movement
        const SKILLS = 1 << 2;
        const ECONOMY = 1 << 3;   // Budgets, prices
        const SOCIAL = 1 << 4;    // Bookmarks, roommates
        const SYSTEM = 1 << 5;    // Server-owned only
    }
}

/// One field an update wants to write.
#[derive(Debug, Clone, Copy)]
pub struct FieldTarget<'a> {
    pub type_tag: TypeTag,
    pub id: EntityId,
    pub path: &'a FieldPath,
    pub category: FieldCategory,
}

/// Decides whether a caller may mutate a field.
pub trait SecurityContext: Send + Sync {
    fn permits(&self, target: &FieldTarget<'_>) -> bool;

    /// Short label for logs.
    fn describe(&self) -> String {
        "context".to_string()
    }
}

/// Internal system caller: may write anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemContext;

impl SecurityContext for SystemContext {
    fn permits(&self, _target: &FieldTarget<'_>) -> bool {
        true
    }

    fn describe(&self) -> String {
        "system".to_string()
    }
}

/// Permits nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl SecurityContext for DenyAll {
    fn permits(&self, _target: &FieldTarget<'_>) -> bool {
        false
    }

    fn describe(&self) -> String {
        "deny-all".to_string()
    }
}

/// Which entities of a type a grant covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityScope {
    All,
    Only(BTreeSet<EntityId>),
}

impl EntityScope {
    fn covers(&self, id: EntityId) -> bool {
        match self {
            EntityScope::All => true,
            EntityScope::Only(ids) => ids.contains(&id),
        }
    }
}

/// Permission to write some categories on some entities of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub type_tag: TypeTag,
    pub scope: EntityScope,
    pub categories: FieldCategory,
}

impl Grant {
    /// Grant on a single entity.
    pub fn entity(type_tag: TypeTag, id: EntityId, categories: FieldCategory) -> Self {
        Self {
            type_tag,
            scope: EntityScope::Only(BTreeSet::from([id])),
            categories,
        }
    }

    /// Grant on every entity of a type.
    pub fn type_wide(type_tag: TypeTag, categories: FieldCategory) -> Self {
        Self {
            type_tag,
            scope: EntityScope::All,
            categories,
        }
    }

    fn permits(&self, target: &FieldTarget<'_>) -> bool {
        self.type_tag == target.type_tag
            && self.scope.covers(target.id)
            && !target.category.is_empty()
            && self.categories.contains(target.category)
    }
}

/// Capability token carried by a connection's caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityToken {
    pub label: String,
    grants: Vec<Grant>,
}

impl CapabilityToken {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            grants: Vec::new(),
        }
    }

    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }

    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }
}

impl SecurityContext for CapabilityToken {
    fn permits(&self, target: &FieldTarget<'_>) -> bool {
        self.grants.iter().any(|g| g.permits(target))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
