// src/instancer/normalize/mod.rs
//! Normalize the four instancer encodings into (object, transforms, indices) tuples.

use bevy::prelude::*;
use std::sync::Arc;

use crate::instancer::attributes::AttributeOwner;
use crate::instancer::context::CookContext;
use crate::instancer::core::{GeometryPartDescriptor, InstancerKind, ObjectRef};
use crate::instancer::split::{partition_instances, PerSplitMap, PerSplitSources, SplitAttribute};

mod attribute;
mod object_id;
mod packed;

pub use attribute::AttributeInstancerEncoding;
pub use object_id::{LegacyInstancerEncoding, ObjectInstancerEncoding};
pub use packed::PackedPrimitiveEncoding;

/// What an extracted group of instances points at, before resolution.
#[derive(Clone, Debug, PartialEq)]
pub enum InstanceSource {
    /// Already a loadable object.
    Object { object: ObjectRef, placeholder: bool },
    /// Mesh parts translated earlier in the cook.
    Parts(Vec<GeometryPartDescriptor>),
}

/// One group of instances sharing a source.
#[derive(Clone, Debug, PartialEq)]
pub struct RawGroup {
    pub source: InstanceSource,
    pub transforms: Vec<Transform>,
    pub indices: Vec<usize>,
}

/// One normalized unit: an object and the instances of it.
#[derive(Clone, Debug, PartialEq)]
pub struct InstancerTuple {
    pub object: ObjectRef,
    pub transforms: Vec<Transform>,
    /// Original element index of each transform.
    pub indices: Vec<usize>,
    /// Split value when the part has a split attribute.
    pub split_value: Option<String>,
    /// The object is the placeholder substituted for an unresolved reference.
    pub is_placeholder: bool,
}

impl InstancerTuple {
    #[inline]
    pub fn first_index(&self) -> usize {
        self.indices.first().copied().unwrap_or(0)
    }
}

/// Result of normalizing one instancer part.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedInstancer {
    pub tuples: Vec<InstancerTuple>,
    /// Element class per-instance attributes live on.
    pub instance_owner: AttributeOwner,
    pub split_attribute: Option<String>,
    pub per_split: PerSplitMap,
}

/// One instancer encoding.
pub trait InstancerEncoding: Send + Sync {
    fn kind(&self) -> InstancerKind;

    /// Element class that carries per-instance attributes.
    fn instance_owner(&self) -> AttributeOwner;

    /// Whether the encoding honours `unreal_split_attr`.
    fn supports_split(&self) -> bool;

    fn extract(&self, part: &GeometryPartDescriptor, ctx: &CookContext<'_>) -> Result<Vec<RawGroup>, NormalizeError>;
}

/// Factory: the encoding for an instancer kind.
pub fn make_encoding(kind: InstancerKind) -> Arc<dyn InstancerEncoding> {
    match kind {
        InstancerKind::PackedPrimitive => Arc::new(PackedPrimitiveEncoding),
        InstancerKind::AttributeInstancer => Arc::new(AttributeInstancerEncoding),
        InstancerKind::LegacyAttributeInstancer => Arc::new(LegacyInstancerEncoding),
        InstancerKind::ObjectInstancer => Arc::new(ObjectInstancerEncoding),
    }
}

/// Normalize `part`: extract, split, then resolve parts to objects.
pub fn normalize(part: &GeometryPartDescriptor, ctx: &CookContext<'_>) -> Result<NormalizedInstancer, NormalizeError> {
    let kind = part.instancer_kind().ok_or(NormalizeError::NotAnInstancer)?;
    let encoding = make_encoding(kind);
    let groups = encoding.extract(part, ctx)?;

    for g in &groups {
        if g.transforms.len() != g.indices.len() {
            return Err(NormalizeError::CountMismatch { transforms: g.transforms.len(), other: g.indices.len() });
        }
    }

    let owner = encoding.instance_owner();
    let split = encoding
        .supports_split()
        .then(|| SplitAttribute::read(ctx.reader, part, owner))
        .flatten();

    let mut out = NormalizedInstancer {
        tuples: Vec::new(),
        instance_owner: owner,
        split_attribute: split.as_ref().map(|s| s.name.clone()),
        per_split: PerSplitMap::new(),
    };

    let sources = match split {
        Some(_) => PerSplitSources::read(ctx.reader, part, owner),
        None => PerSplitSources::default(),
    };

    for group in groups {
        let partitions = match split.as_ref() {
            None => vec![(None, group.transforms, group.indices)],
            Some(split) => {
                let Some(values) = split.values_for(&group.indices) else {
                    warn!("Instancer: split attribute '{}' too short for part '{}'; group skipped.", split.name, part.part_name);
                    continue;
                };
                let Some(parts) = partition_instances(&group.transforms, &group.indices, &values, &sources, &mut out.per_split)
                else {
                    warn!("Instancer: split values do not match instances on '{}'; group skipped.", part.part_name);
                    continue;
                };
                parts.into_iter().map(|g| (Some(g.value), g.transforms, g.indices)).collect()
            }
        };

        for (split_value, transforms, indices) in partitions {
            match &group.source {
                InstanceSource::Object { object, placeholder } => out.tuples.push(InstancerTuple {
                    object: object.clone(),
                    transforms,
                    indices,
                    split_value,
                    is_placeholder: *placeholder,
                }),
                InstanceSource::Parts(parts) => {
                    for source_part in parts {
                        for mesh in ctx.meshes.matching(source_part) {
                            let Some(object) = mesh.object_for(transforms.len()) else { continue };
                            out.tuples.push(InstancerTuple {
                                object: object.clone(),
                                transforms: transforms.clone(),
                                indices: indices.clone(),
                                split_value: split_value.clone(),
                                is_placeholder: false,
                            });
                        }
                    }
                }
            }
        }
    }

    if out.tuples.is_empty() {
        return Err(NormalizeError::NothingResolved);
    }
    debug!(
        "Instancer: '{}' ({:?}) normalized into {} tuple(s).",
        part.part_name,
        encoding.kind(),
        out.tuples.len()
    );
    Ok(out)
}

/// Group per-element keys by first occurrence: `(key, element indices)`.
pub(crate) fn group_by_first_occurrence<K: PartialEq + Clone>(keys: &[K]) -> Vec<(K, Vec<usize>)> {
    let mut groups: Vec<(K, Vec<usize>)> = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        match groups.iter_mut().find(|(k, _)| k == key) {
            Some((_, idx)) => idx.push(i),
            None => groups.push((key.clone(), vec![i])),
        }
    }
    groups
}

/// Transforms at `indices`.
pub(crate) fn pick(transforms: &[Transform], indices: &[usize]) -> Vec<Transform> {
    indices.iter().filter_map(|&i| transforms.get(i).copied()).collect()
}

// ---------- Errors ----------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("part is not an instancer")]
    NotAnInstancer,
    #[error("engine returned no instance transforms")]
    MissingTransforms,
    #[error("engine returned no instanced ids")]
    MissingInstancedIds,
    #[error("no instance selector attribute")]
    MissingSelector,
    #[error("{transforms} transforms but {other} per-instance entries")]
    CountMismatch { transforms: usize, other: usize },
    #[error("object instancer has no object to instance")]
    NoObjectToInstance,
    #[error("no instanced object could be resolved")]
    NothingResolved,
}
