// src/instancer/normalize/packed.rs
use bevy::prelude::*;

use super::{group_by_first_occurrence, pick, InstanceSource, InstancerEncoding, NormalizeError, RawGroup};
use crate::instancer::attributes::AttributeOwner;
use crate::instancer::context::CookContext;
use crate::instancer::core::{GeometryPartDescriptor, InstancerKind};

/// Packed primitives: one transform and one instanced part id per primitive.
pub struct PackedPrimitiveEncoding;

impl InstancerEncoding for PackedPrimitiveEncoding {
    fn kind(&self) -> InstancerKind {
        InstancerKind::PackedPrimitive
    }

    fn instance_owner(&self) -> AttributeOwner {
        AttributeOwner::Prim
    }

    fn supports_split(&self) -> bool {
        true
    }

    fn extract(&self, part: &GeometryPartDescriptor, ctx: &CookContext<'_>) -> Result<Vec<RawGroup>, NormalizeError> {
        let transforms = ctx.reader.instance_transforms(part).ok_or(NormalizeError::MissingTransforms)?;
        let part_ids = ctx.reader.instanced_part_ids(part).ok_or(NormalizeError::MissingInstancedIds)?;
        if part_ids.len() != transforms.len() {
            return Err(NormalizeError::CountMismatch { transforms: transforms.len(), other: part_ids.len() });
        }

        let mut groups = Vec::new();
        for (instanced_id, indices) in group_by_first_occurrence(&part_ids) {
            let Some(source) = ctx.meshes.find_part(part.object_id, part.geo_id, instanced_id) else {
                debug!("Instancer: packed part {} of '{}' has no translated mesh.", instanced_id, part.part_name);
                continue;
            };
            groups.push(RawGroup {
                source: InstanceSource::Parts(vec![source.clone()]),
                transforms: pick(&transforms, &indices),
                indices,
            });
        }
        Ok(groups)
    }
}
