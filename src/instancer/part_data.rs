// src/instancer/part_data.rs
//! Everything read from the engine for one instancer part, gathered once per cook.

use bevy::prelude::*;
use std::collections::HashMap;

use super::attributes::{AttributeArray, AttributeOwner, AttributeValue, IndexedInts, IndexedStrings, ANY_OWNER};
use super::attributes::{find_attribute, flag_attribute};
use super::context::CookContext;
use super::core::*;
use super::custom_data::{pack_per_object, CustomData};
use super::normalize::{normalize, NormalizeError, NormalizedInstancer};

/// Per-part switches controlling the node kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstancerFlags {
    pub force_hierarchical: bool,
    pub force_instancer: bool,
    pub split_instances: bool,
    pub foliage: bool,
}

impl InstancerFlags {
    pub fn read(ctx: &CookContext<'_>, part: &GeometryPartDescriptor) -> Self {
        use AttributeOwner::*;
        let r = ctx.reader;
        Self {
            force_hierarchical: flag_attribute(r, part, ATTR_HIERARCHICAL_INSTANCER, &ANY_OWNER),
            force_instancer: flag_attribute(r, part, ATTR_FORCE_INSTANCER, &ANY_OWNER),
            split_instances: flag_attribute(r, part, ATTR_SPLIT_INSTANCES, &[Detail, Prim]),
            foliage: flag_attribute(r, part, ATTR_FOLIAGE_INSTANCER, &[Detail, Prim, Point]),
        }
    }
}

/// An `unreal_uproperty_*` attribute, name without the prefix.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyAttribute {
    pub name: String,
    pub owner: AttributeOwner,
    pub values: AttributeArray,
}

/// One property value to apply to a node.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedProperty {
    pub name: String,
    pub value: AttributeValue,
}

impl ResolvedProperty {
    pub fn is_hidden_in_game(&self) -> bool {
        is_hidden_property(&self.name)
    }
}

fn is_hidden_property(name: &str) -> bool {
    name == "HiddenInGame" || name == "bHiddenInGame"
}

/// Bake/level metadata arrays, indexed by original element index.
#[derive(Clone, Debug, Default)]
pub struct PartMetadata {
    pub level_paths: Option<IndexedStrings>,
    pub output_names: Option<IndexedStrings>,
    pub bake_names: Option<IndexedStrings>,
    pub bake_actor_names: Option<IndexedStrings>,
    pub bake_actor_classes: Option<IndexedStrings>,
    pub bake_folders: Option<IndexedStrings>,
    pub bake_outliner_folders: Option<IndexedStrings>,
    pub tiles: Option<IndexedInts>,
    pub materials: Option<IndexedStrings>,
}

impl PartMetadata {
    fn read(ctx: &CookContext<'_>, part: &GeometryPartDescriptor, owner: AttributeOwner) -> Self {
        use AttributeOwner::*;
        let owners = [owner, Detail];
        let strings = |name: &str| IndexedStrings::read(ctx.reader, part, name, &owners);
        Self {
            level_paths: strings(ATTR_LEVEL_PATH),
            output_names: strings(ATTR_OUTPUT_NAME),
            bake_names: strings(ATTR_BAKE_NAME),
            bake_actor_names: strings(ATTR_BAKE_ACTOR),
            bake_actor_classes: strings(ATTR_BAKE_ACTOR_CLASS),
            bake_folders: strings(ATTR_BAKE_FOLDER),
            bake_outliner_folders: strings(ATTR_BAKE_OUTLINER_FOLDER),
            tiles: IndexedInts::read(ctx.reader, part, ATTR_TILE, &owners),
            materials: IndexedStrings::read(ctx.reader, part, ATTR_MATERIAL, &[Prim, Point, Detail]),
        }
    }
}

/// Cached key/value pairs stored on an output object for later baking.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CachedMetadata {
    pub attributes: HashMap<String, String>,
    pub tokens: HashMap<String, String>,
}

/// All engine data of one instancer part.
#[derive(Clone, Debug)]
pub struct InstancerPartData {
    pub part: GeometryPartDescriptor,
    pub flags: InstancerFlags,
    pub instancer: NormalizedInstancer,
    pub properties: Vec<PropertyAttribute>,
    /// Indexed like `instancer.tuples`.
    pub custom_data: Vec<Option<CustomData>>,
    pub metadata: PartMetadata,
}

impl InstancerPartData {
    /// Normalize `part` and read the attributes its outputs need.
    pub fn populate(part: &GeometryPartDescriptor, ctx: &CookContext<'_>) -> Result<Self, NormalizeError> {
        let instancer = normalize(part, ctx)?;
        let owner = instancer.instance_owner;
        Ok(Self {
            flags: InstancerFlags::read(ctx, part),
            properties: read_properties(ctx, part, owner),
            custom_data: pack_per_object(ctx.reader, part, &instancer.tuples),
            metadata: PartMetadata::read(ctx, part, owner),
            part: part.clone(),
            instancer,
        })
    }

    /// Property values at original index `index`.
    pub fn properties_at(&self, index: usize) -> Vec<ResolvedProperty> {
        self.properties
            .iter()
            .filter_map(|p| {
                p.values
                    .value_at(p.owner, index)
                    .map(|value| ResolvedProperty { name: p.name.clone(), value })
            })
            .collect()
    }

    /// A property attribute decides visibility instead of the engine.
    pub fn overrides_hidden(&self) -> bool {
        self.properties.iter().any(|p| is_hidden_property(&p.name))
    }

    pub fn material_at(&self, index: usize) -> Option<&str> {
        self.metadata
            .materials
            .as_ref()
            .and_then(|m| m.get(index))
            .filter(|m| !m.is_empty())
    }

    /// Hidden flag for a node: placeholders hide, property overrides leave it alone.
    pub fn hidden_flag(&self, is_placeholder: bool) -> Option<bool> {
        if is_placeholder {
            Some(true)
        } else if self.overrides_hidden() {
            None
        } else {
            Some(false)
        }
    }

    /// Metadata cached for the outputs of tuple `tuple_index`, read at `first_index`.
    pub fn cached_metadata(&self, tuple_index: usize, first_index: usize) -> CachedMetadata {
        let mut cached = CachedMetadata::default();
        let m = &self.metadata;
        let mut put = |key: &str, src: &Option<IndexedStrings>| {
            if let Some(v) = src.as_ref().and_then(|s| s.get(first_index)).filter(|v| !v.is_empty()) {
                cached.attributes.insert(key.to_string(), v.to_string());
            }
        };
        put(ATTR_LEVEL_PATH, &m.level_paths);
        put(ATTR_OUTPUT_NAME, &m.output_names);
        put(ATTR_BAKE_NAME, &m.bake_names);
        put(ATTR_BAKE_ACTOR, &m.bake_actor_names);
        put(ATTR_BAKE_ACTOR_CLASS, &m.bake_actor_classes);
        put(ATTR_BAKE_FOLDER, &m.bake_folders);
        put(ATTR_BAKE_OUTLINER_FOLDER, &m.bake_outliner_folders);

        if let Some(tile) = m.tiles.as_ref().and_then(|t| t.get(first_index)).filter(|t| *t >= 0) {
            cached.tokens.insert(ATTR_TILE.to_string(), tile.to_string());
        }

        let split_name = self.instancer.split_attribute.as_deref();
        let split_value = self.instancer.tuples.get(tuple_index).and_then(|t| t.split_value.as_deref());
        if let (Some(name), Some(value)) = (split_name, split_value) {
            cached.attributes.insert(name.to_string(), value.to_string());
            cached.tokens.insert(name.to_string(), value.to_string());

            if let Some(per_split) = self.instancer.per_split.get(value).filter(|_| !value.is_empty()) {
                let overrides = [
                    (ATTR_LEVEL_PATH, &per_split.level_path),
                    (ATTR_BAKE_ACTOR, &per_split.bake_actor_name),
                    (ATTR_BAKE_ACTOR_CLASS, &per_split.bake_actor_class),
                    (ATTR_BAKE_OUTLINER_FOLDER, &per_split.bake_outliner_folder),
                    (ATTR_BAKE_FOLDER, &per_split.bake_folder),
                ];
                for (key, v) in overrides {
                    if !v.is_empty() {
                        cached.attributes.insert(key.to_string(), v.clone());
                    }
                }
            }
        }
        cached
    }
}

fn read_properties(ctx: &CookContext<'_>, part: &GeometryPartDescriptor, owner: AttributeOwner) -> Vec<PropertyAttribute> {
    let mut out: Vec<PropertyAttribute> = Vec::new();
    for o in [owner, AttributeOwner::Detail] {
        for full in ctx.reader.attribute_names(part, o) {
            let Some(name) = full.strip_prefix(ATTR_PROPERTY_PREFIX) else { continue };
            if name.is_empty() || out.iter().any(|p| p.name == name) {
                continue;
            }
            let Some((found_owner, values)) = find_attribute(ctx.reader, part, &full, &[o]) else { continue };
            out.push(PropertyAttribute { name: name.to_string(), owner: found_owner, values });
        }
    }
    if !out.is_empty() {
        debug!("Instancer: '{}' forwards {} property attribute(s).", part.part_name, out.len());
    }
    out
}
