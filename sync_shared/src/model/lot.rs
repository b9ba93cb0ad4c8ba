//! Lot entity.

use serde::{Deserialize, Serialize};

use crate::{
    entity::{wrong_shape, EntityRecord, SyncEntity, WriteError},
    registry::{FieldDescriptor, FieldKind, TypeTag},
    security::FieldCategory,
    store::EntityId,
    value::{FieldValue, WireEncoding},
};

use super::u32_list;

pub const NAME: u32 = 1;
pub const DESCRIPTION: u32 = 2;
pub const OWNER: u32 = 3;
pub const PRICE: u32 = 4;
pub const ROOMMATES: u32 = 5;
pub const LOCATION: u32 = 6;
pub const OPEN: u32 = 7;

/// A property on the city map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    /// Owning avatar id, 0 when unowned.
    pub owner: u32,
    pub price: u32,
    pub roommates: Vec<u32>,
    /// Packed map coordinate.
    pub location: u32,
    pub is_open: bool,
}

pub(crate) fn fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::leaf(NAME, "name", WireEncoding::Str, FieldCategory::PROFILE),
        FieldDescriptor::leaf(DESCRIPTION, "description", WireEncoding::Str, FieldCategory::PROFILE),
        FieldDescriptor::leaf(OWNER, "owner", WireEncoding::U32, FieldCategory::SYSTEM),
        FieldDescriptor::leaf(PRICE, "price", WireEncoding::U32, FieldCategory::ECONOMY),
        FieldDescriptor::list(
            ROOMMATES,
            "roommates",
            FieldKind::Leaf(WireEncoding::U32),
            FieldCategory::SOCIAL,
        ),
        FieldDescriptor::leaf(LOCATION, "location", WireEncoding::U32, FieldCategory::SYSTEM),
        FieldDescriptor::leaf(OPEN, "open", WireEncoding::Bool, FieldCategory::PROFILE),
    ]
}

impl EntityRecord for Lot {
    fn type_tag(&self) -> TypeTag {
        Self::TYPE_TAG
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn read_field(&self, field: u32) -> Option<FieldValue> {
        let v = match field {
            NAME => FieldValue::from(self.name.as_str()),
            DESCRIPTION => FieldValue::from(self.description.as_str()),
            OWNER => FieldValue::U32(self.owner),
            PRICE => FieldValue::U32(self.price),
            ROOMMATES => FieldValue::from(self.roommates.clone()),
            LOCATION => FieldValue::U32(self.location),
            OPEN => FieldValue::Bool(self.is_open),
            _ => return None,
        };
        Some(v)
    }

    fn write_field(&mut self, field: u32, value: FieldValue) -> Result<(), WriteError> {
        match field {
            NAME => self.name = value.as_str().ok_or(wrong_shape(field, "str"))?.to_string(),
            DESCRIPTION => {
                self.description = value.as_str().ok_or(wrong_shape(field, "str"))?.to_string()
            }
            OWNER => self.owner = value.as_u32().ok_or(wrong_shape(field, "u32"))?,
            PRICE => self.price = value.as_u32().ok_or(wrong_shape(field, "u32"))?,
            ROOMMATES => self.roommates = u32_list(&value).ok_or(wrong_shape(field, "list<u32>"))?,
            LOCATION => self.location = value.as_u32().ok_or(wrong_shape(field, "u32"))?,
            OPEN => self.is_open = value.as_bool().ok_or(wrong_shape(field, "bool"))?,
            _ => return Err(WriteError::UnknownField(field)),
        }
        Ok(())
    }
}

impl SyncEntity for Lot {
    const TYPE_TAG: TypeTag = TypeTag(2);

    fn spawn(id: EntityId) -> Self {
        Lot {
            id,
            name: String::new(),
            description: String::new(),
            owner: 0,
            price: 0,
            roommates: Vec::new(),
            location: 0,
            is_open: false,
        }
    }
}
