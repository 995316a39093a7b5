// src/instancer/normalize/object_id.rs
//! Encodings that point at whole engine objects by id.

use bevy::prelude::*;

use super::{group_by_first_occurrence, pick, InstanceSource, InstancerEncoding, NormalizeError, RawGroup};
use crate::instancer::attributes::AttributeOwner;
use crate::instancer::context::CookContext;
use crate::instancer::core::{GeometryPartDescriptor, InstancerKind};

/// Per-point integer object ids; each id selects that object's non-instanced mesh parts.
pub struct LegacyInstancerEncoding;

impl InstancerEncoding for LegacyInstancerEncoding {
    fn kind(&self) -> InstancerKind {
        InstancerKind::LegacyAttributeInstancer
    }

    fn instance_owner(&self) -> AttributeOwner {
        AttributeOwner::Point
    }

    fn supports_split(&self) -> bool {
        false
    }

    fn extract(&self, part: &GeometryPartDescriptor, ctx: &CookContext<'_>) -> Result<Vec<RawGroup>, NormalizeError> {
        let transforms = ctx.reader.instance_transforms(part).ok_or(NormalizeError::MissingTransforms)?;
        let object_ids = ctx.reader.instanced_object_ids(part).ok_or(NormalizeError::MissingInstancedIds)?;
        if object_ids.len() != transforms.len() {
            return Err(NormalizeError::CountMismatch { transforms: transforms.len(), other: object_ids.len() });
        }

        let mut groups = Vec::new();
        for (object_id, indices) in group_by_first_occurrence(&object_ids) {
            let parts = ctx.meshes.parts_of_object(object_id, true);
            if parts.is_empty() {
                debug!("Instancer: object {} instanced by '{}' has no mesh parts.", object_id, part.part_name);
                continue;
            }
            groups.push(RawGroup { source: InstanceSource::Parts(parts), transforms: pick(&transforms, &indices), indices });
        }
        Ok(groups)
    }
}

/// One object id for the whole part.
pub struct ObjectInstancerEncoding;

impl InstancerEncoding for ObjectInstancerEncoding {
    fn kind(&self) -> InstancerKind {
        InstancerKind::ObjectInstancer
    }

    fn instance_owner(&self) -> AttributeOwner {
        AttributeOwner::Point
    }

    fn supports_split(&self) -> bool {
        false
    }

    fn extract(&self, part: &GeometryPartDescriptor, ctx: &CookContext<'_>) -> Result<Vec<RawGroup>, NormalizeError> {
        if part.object_to_instance_id < 0 {
            return Err(NormalizeError::NoObjectToInstance);
        }
        let transforms = ctx.reader.instance_transforms(part).ok_or(NormalizeError::MissingTransforms)?;
        let parts = ctx.meshes.parts_of_object(part.object_to_instance_id, false);
        if parts.is_empty() {
            return Ok(Vec::new());
        }
        let indices: Vec<usize> = (0..transforms.len()).collect();
        Ok(vec![RawGroup { source: InstanceSource::Parts(parts), transforms, indices }])
    }
}
