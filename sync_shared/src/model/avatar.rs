//! Avatar entity.

use serde::{Deserialize, Serialize};

use crate::{
    entity::{wrong_shape, EntityRecord, SyncEntity, WriteError},
    math::Vec3,
    registry::{FieldDescriptor, FieldKind, TypeTag},
    security::FieldCategory,
    store::EntityId,
    value::{FieldValue, WireEncoding},
};

use super::{u32_list, vec3_from, vec3_value};

pub const NAME: u32 = 1;
pub const DESCRIPTION: u32 = 2;
pub const POSITION: u32 = 3;
pub const SKILLS: u32 = 4;
pub const BUDGET: u32 = 5;
pub const BOOKMARKS: u32 = 6;
pub const CURRENT_LOT: u32 = 7;
pub const PRIVACY_MODE: u32 = 8;

pub const POS_X: u32 = 1;
pub const POS_Y: u32 = 2;
pub const POS_Z: u32 = 3;

pub const SKILL_BODY: u32 = 1;
pub const SKILL_COOKING: u32 = 2;
pub const SKILL_CHARISMA: u32 = 3;
pub const SKILL_LOGIC: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Skills {
    pub body: u16,
    pub cooking: u16,
    pub charisma: u16,
    pub logic: u16,
}

impl Skills {
    pub fn total(&self) -> u32 {
        u32::from(self.body)
            + u32::from(self.cooking)
            + u32::from(self.charisma)
            + u32::from(self.logic)
    }

    fn to_value(self) -> FieldValue {
        FieldValue::structure([
            (SKILL_BODY, FieldValue::U16(self.body)),
            (SKILL_COOKING, FieldValue::U16(self.cooking)),
            (SKILL_CHARISMA, FieldValue::U16(self.charisma)),
            (SKILL_LOGIC, FieldValue::U16(self.logic)),
        ])
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        Some(Skills {
            body: value.member(SKILL_BODY)?.as_u16()?,
            cooking: value.member(SKILL_COOKING)?.as_u16()?,
            charisma: value.member(SKILL_CHARISMA)?.as_u16()?,
            logic: value.member(SKILL_LOGIC)?.as_u16()?,
        })
    }
}

/// A player's avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Avatar {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub position: Vec3,
    pub skills: Skills,
    pub budget: u32,
    pub bookmarks: Vec<u32>,
    pub current_lot: u32,
    pub privacy_mode: u8,
    /// Derived from `skills`.
    #[serde(skip)]
    skill_total: u32,
}

impl Avatar {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Avatar {
            name: name.into(),
            ..Avatar::spawn(id)
        }
    }

    pub fn skill_total(&self) -> u32 {
        self.skill_total
    }
}

pub(crate) fn fields() -> Vec<FieldDescriptor> {
    let f32_member = |id: u32, name: &'static str| FieldDescriptor::leaf(id, name, WireEncoding::F32, FieldCategory::empty());
    let skill = |id: u32, name: &'static str| FieldDescriptor::leaf(id, name, WireEncoding::U16, FieldCategory::empty());
    vec![
        FieldDescriptor::leaf(NAME, "name", WireEncoding::Str, FieldCategory::SYSTEM),
        FieldDescriptor::leaf(DESCRIPTION, "description", WireEncoding::Str, FieldCategory::PROFILE),
        FieldDescriptor::structure(
            POSITION,
            "position",
            vec![f32_member(POS_X, "x"), f32_member(POS_Y, "y"), f32_member(POS_Z, "z")],
            FieldCategory::MOTION,
        ),
        FieldDescriptor::structure(
            SKILLS,
            "skills",
            vec![
                skill(SKILL_BODY, "body"),
                skill(SKILL_COOKING, "cooking"),
                skill(SKILL_CHARISMA, "charisma"),
                skill(SKILL_LOGIC, "logic"),
            ],
            FieldCategory::SKILLS,
        ),
        FieldDescriptor::leaf(BUDGET, "budget", WireEncoding::U32, FieldCategory::ECONOMY),
        FieldDescriptor::list(
            BOOKMARKS,
            "bookmarks",
            FieldKind::Leaf(WireEncoding::U32),
            FieldCategory::SOCIAL,
        ),
        FieldDescriptor::leaf(CURRENT_LOT, "current_lot", WireEncoding::U32, FieldCategory::SYSTEM),
        FieldDescriptor::leaf(PRIVACY_MODE, "privacy_mode", WireEncoding::U8, FieldCategory::PROFILE),
    ]
}

impl EntityRecord for Avatar {
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
            POSITION => vec3_value(self.position),
            SKILLS => self.skills.to_value(),
            BUDGET => FieldValue::U32(self.budget),
            BOOKMARKS => FieldValue::from(self.bookmarks.clone()),
            CURRENT_LOT => FieldValue::U32(self.current_lot),
            PRIVACY_MODE => FieldValue::U8(self.privacy_mode),
            _ => return None,
        };
        Some(v)
    }

    fn write_field(&mut self, field: u32, value: FieldValue) -> Result<(), WriteError> {
        match field {
            NAME => {
                self.name = value.as_str().ok_or(wrong_shape(field, "str"))?.to_string();
            }
            DESCRIPTION => {
                self.description = value.as_str().ok_or(wrong_shape(field, "str"))?.to_string();
            }
            POSITION => {
                self.position = vec3_from(&value).ok_or(wrong_shape(field, "vec3"))?;
            }
            SKILLS => {
                self.skills = Skills::from_value(&value).ok_or(wrong_shape(field, "skills"))?;
            }
            BUDGET => {
                self.budget = value.as_u32().ok_or(wrong_shape(field, "u32"))?;
            }
            BOOKMARKS => {
                self.bookmarks = u32_list(&value).ok_or(wrong_shape(field, "list<u32>"))?;
            }
            CURRENT_LOT => {
                self.current_lot = value.as_u32().ok_or(wrong_shape(field, "u32"))?;
            }
            PRIVACY_MODE => {
                self.privacy_mode = value.as_u8().ok_or(wrong_shape(field, "u8"))?;
            }
            _ => return Err(WriteError::UnknownField(field)),
        }
        Ok(())
    }

    fn refresh_derived(&mut self) {
        self.skill_total = self.skills.total();
    }
}

impl SyncEntity for Avatar {
    const TYPE_TAG: TypeTag = TypeTag(1);

    fn spawn(id: EntityId) -> Self {
        Avatar {
            id,
            name: String::new(),
            description: String::new(),
            position: Vec3::ZERO,
            skills: Skills::default(),
            budget: 0,
            bookmarks: Vec::new(),
            current_lot: 0,
            privacy_mode: 0,
            skill_total: 0,
        }
    }
}
