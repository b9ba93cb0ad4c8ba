//! Built-in game entity types and the bootstrap registry.
//!
//! Field ids and mask ids here are wire vocabulary: never renumber them.

pub mod avatar;
pub mod lot;

pub use avatar::{Avatar, Skills};
pub use lot::Lot;

use crate::{
    error::RegistryError,
    math::Vec3,
    registry::{FieldMaskRegistry, MaskDescriptor, MaskId, RegistryBuilder},
    value::FieldValue,
};

pub const AVATAR_POSITION: MaskId = MaskId(1);
pub const AVATAR_PROFILE: MaskId = MaskId(2);
pub const AVATAR_SKILLS: MaskId = MaskId(3);
pub const AVATAR_BOOKMARKS: MaskId = MaskId(4);
pub const AVATAR_BUDGET: MaskId = MaskId(5);

pub const LOT_INFO: MaskId = MaskId(10);
pub const LOT_ROOMMATES: MaskId = MaskId(11);
pub const LOT_OWNERSHIP: MaskId = MaskId(12);

/// Registers the built-in types and masks into `builder`.
pub fn register_builtin(builder: &mut RegistryBuilder) {
    use crate::entity::SyncEntity;

    builder.register_entity::<Avatar>("Avatar", avatar::fields());
    builder.register_entity::<Lot>("Lot", lot::fields());

    let av = Avatar::TYPE_TAG;
    builder
        .register_mask(
            MaskDescriptor::new(
                AVATAR_POSITION,
                "avatar.position",
                av,
                vec![
                    [avatar::POSITION, avatar::POS_X].into(),
                    [avatar::POSITION, avatar::POS_Y].into(),
                    [avatar::POSITION, avatar::POS_Z].into(),
                ],
            )
            .packed(),
        )
        .register_mask(MaskDescriptor::new(
            AVATAR_PROFILE,
            "avatar.profile",
            av,
            vec![[avatar::DESCRIPTION].into(), [avatar::PRIVACY_MODE].into()],
        ))
        .register_mask(MaskDescriptor::new(
            AVATAR_SKILLS,
            "avatar.skills",
            av,
            vec![[avatar::SKILLS].into()],
        ))
        .register_mask(MaskDescriptor::new(
            AVATAR_BOOKMARKS,
            "avatar.bookmarks",
            av,
            vec![[avatar::BOOKMARKS].into()],
        ))
        .register_mask(MaskDescriptor::new(
            AVATAR_BUDGET,
            "avatar.budget",
            av,
            vec![[avatar::BUDGET].into()],
        ));

    let lt = Lot::TYPE_TAG;
    builder
        .register_mask(
            MaskDescriptor::new(
                LOT_INFO,
                "lot.info",
                lt,
                vec![[lot::NAME].into(), [lot::DESCRIPTION].into(), [lot::OPEN].into()],
            )
            .packed(),
        )
        .register_mask(MaskDescriptor::new(
            LOT_ROOMMATES,
            "lot.roommates",
            lt,
            vec![[lot::ROOMMATES].into()],
        ))
        .register_mask(
            MaskDescriptor::new(
                LOT_OWNERSHIP,
                "lot.ownership",
                lt,
                vec![[lot::OWNER].into(), [lot::PRICE].into()],
            )
            .packed(),
        );
}

/// Registry containing only the built-in types.
pub fn bootstrap_registry() -> Result<FieldMaskRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    register_builtin(&mut builder);
    builder.seal()
}

pub(crate) fn vec3_value(v: Vec3) -> FieldValue {
    FieldValue::structure([
        (1, FieldValue::F32(v.x)),
        (2, FieldValue::F32(v.y)),
        (3, FieldValue::F32(v.z)),
    ])
}

pub(crate) fn vec3_from(value: &FieldValue) -> Option<Vec3> {
    Some(Vec3::new(
        value.member(1)?.as_f32()?,
        value.member(2)?.as_f32()?,
        value.member(3)?.as_f32()?,
    ))
}

pub(crate) fn u32_list(value: &FieldValue) -> Option<Vec<u32>> {
    value.as_list()?.iter().map(FieldValue::as_u32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SyncEntity;

    #[test]
    fn bootstrap_registers_both_types() {
        let reg = bootstrap_registry().unwrap();
        assert_eq!(reg.type_tags(), vec![Avatar::TYPE_TAG, Lot::TYPE_TAG]);
        assert_eq!(reg.masks_for(Avatar::TYPE_TAG).len(), 5);
        assert_eq!(reg.masks_for(Lot::TYPE_TAG).len(), 3);
        let pos = reg.resolve_mask(AVATAR_POSITION).unwrap();
        assert_eq!(pos.paths.len(), 3);
    }

    #[test]
    fn list_helper_rejects_mixed_elements() {
        let v = FieldValue::List(vec![FieldValue::U32(1), FieldValue::from("x")]);
        assert!(u32_list(&v).is_none());
        assert_eq!(u32_list(&FieldValue::from(vec![4, 5])), Some(vec![4, 5]));
    }
}
