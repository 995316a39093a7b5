// src/instancer/normalize/attribute.rs
use bevy::prelude::*;

use super::{group_by_first_occurrence, pick, InstanceSource, InstancerEncoding, NormalizeError, RawGroup};
use crate::instancer::attributes::{find_attribute, AttributeOwner};
use crate::instancer::context::CookContext;
use crate::instancer::core::{GeometryPartDescriptor, InstancerKind, ObjectRef, ATTR_INSTANCE, ATTR_INSTANCE_OVERRIDE};

/// Points carrying an asset path or class name in a string attribute.
pub struct AttributeInstancerEncoding;

impl AttributeInstancerEncoding {
    /// Resolve one selector value, falling back to the placeholder.
    fn source_for(path: &str, part: &GeometryPartDescriptor, ctx: &CookContext<'_>) -> Option<InstanceSource> {
        if let Some(object) = ctx.resolver.resolve(path) {
            return Some(InstanceSource::Object { object, placeholder: false });
        }
        let placeholder: ObjectRef = match ctx.placeholder.clone() {
            Some(p) => p,
            None => {
                warn!("Instancer: '{}' on part '{}' could not be loaded.", path, part.part_name);
                return None;
            }
        };
        warn!(
            "Instancer: '{}' on part '{}' could not be loaded; using placeholder '{}'.",
            path, part.part_name, placeholder.path
        );
        Some(InstanceSource::Object { object: placeholder, placeholder: true })
    }
}

impl InstancerEncoding for AttributeInstancerEncoding {
    fn kind(&self) -> InstancerKind {
        InstancerKind::AttributeInstancer
    }

    fn instance_owner(&self) -> AttributeOwner {
        AttributeOwner::Point
    }

    fn supports_split(&self) -> bool {
        true
    }

    fn extract(&self, part: &GeometryPartDescriptor, ctx: &CookContext<'_>) -> Result<Vec<RawGroup>, NormalizeError> {
        let transforms = ctx.reader.instance_transforms(part).ok_or(NormalizeError::MissingTransforms)?;

        let selector = find_attribute(ctx.reader, part, ATTR_INSTANCE, &[AttributeOwner::Point])
            .or_else(|| find_attribute(ctx.reader, part, ATTR_INSTANCE_OVERRIDE, &[AttributeOwner::Point, AttributeOwner::Detail]));
        let Some((owner, values)) = selector else {
            return Err(NormalizeError::MissingSelector);
        };
        let values = values.to_strings().ok_or(NormalizeError::MissingSelector)?;

        if owner == AttributeOwner::Detail {
            let path = values.first().ok_or(NormalizeError::MissingSelector)?;
            let Some(source) = Self::source_for(path, part, ctx) else {
                return Ok(Vec::new());
            };
            let indices: Vec<usize> = (0..transforms.len()).collect();
            return Ok(vec![RawGroup { source, transforms, indices }]);
        }

        if values.len() != transforms.len() {
            return Err(NormalizeError::CountMismatch { transforms: transforms.len(), other: values.len() });
        }

        let mut groups = Vec::new();
        for (path, indices) in group_by_first_occurrence(&values) {
            let Some(source) = Self::source_for(&path, part, ctx) else { continue };
            groups.push(RawGroup { source, transforms: pick(&transforms, &indices), indices });
        }
        Ok(groups)
    }
}
