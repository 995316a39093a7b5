// src/instancer/split.rs
//! Partition instance lists by the value of a user-chosen split attribute.

use bevy::prelude::*;
use std::collections::HashMap;

use super::attributes::{AttributeOwner, AttributeReader, IndexedStrings};
use super::core::{
    GeometryPartDescriptor, ATTR_BAKE_ACTOR, ATTR_BAKE_ACTOR_CLASS, ATTR_BAKE_FOLDER,
    ATTR_BAKE_OUTLINER_FOLDER, ATTR_LEVEL_PATH, ATTR_SPLIT_ATTR,
};

/// Bake/level metadata attached to one split value. Empty strings mean "not set".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PerSplitAttributes {
    pub level_path: String,
    pub bake_actor_name: String,
    pub bake_actor_class: String,
    pub bake_folder: String,
    pub bake_outliner_folder: String,
}

pub type PerSplitMap = HashMap<String, PerSplitAttributes>;

/// The split attribute of a part: its name and one string value per element.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitAttribute {
    pub name: String,
    pub values: Vec<String>,
}

impl SplitAttribute {
    /// `unreal_split_attr` names the attribute on `owner`; its values are read as strings.
    pub fn read(reader: &dyn AttributeReader, part: &GeometryPartDescriptor, owner: AttributeOwner) -> Option<Self> {
        let name = reader
            .attribute(part, ATTR_SPLIT_ATTR, owner)
            .to_strings()?
            .into_iter()
            .next()
            .filter(|n| !n.is_empty())?;
        let values = reader.attribute(part, &name, owner).to_strings()?;
        Some(Self { name, values })
    }

    /// Split value of every listed original index; `None` on any out-of-range index.
    pub fn values_for(&self, indices: &[usize]) -> Option<Vec<String>> {
        indices.iter().map(|&i| self.values.get(i).cloned()).collect()
    }
}

/// Per-index sources for [`PerSplitAttributes`].
#[derive(Clone, Debug, Default)]
pub struct PerSplitSources {
    pub level_paths: Option<IndexedStrings>,
    pub bake_actor_names: Option<IndexedStrings>,
    pub bake_actor_classes: Option<IndexedStrings>,
    pub bake_folders: Option<IndexedStrings>,
    pub bake_outliner_folders: Option<IndexedStrings>,
}

impl PerSplitSources {
    pub fn read(reader: &dyn AttributeReader, part: &GeometryPartDescriptor, owner: AttributeOwner) -> Self {
        let owners = [owner, AttributeOwner::Detail];
        let read = |name: &str| IndexedStrings::read(reader, part, name, &owners);
        Self {
            level_paths: read(ATTR_LEVEL_PATH),
            bake_actor_names: read(ATTR_BAKE_ACTOR),
            bake_actor_classes: read(ATTR_BAKE_ACTOR_CLASS),
            bake_folders: read(ATTR_BAKE_FOLDER),
            bake_outliner_folders: read(ATTR_BAKE_OUTLINER_FOLDER),
        }
    }

    fn at(&self, index: usize) -> PerSplitAttributes {
        let get = |src: &Option<IndexedStrings>| {
            src.as_ref().and_then(|s| s.get(index)).unwrap_or_default().to_string()
        };
        PerSplitAttributes {
            level_path: get(&self.level_paths),
            bake_actor_name: get(&self.bake_actor_names),
            bake_actor_class: get(&self.bake_actor_classes),
            bake_folder: get(&self.bake_folders),
            bake_outliner_folder: get(&self.bake_outliner_folders),
        }
    }
}

/// One partition of a tuple.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitGroup {
    pub value: String,
    pub transforms: Vec<Transform>,
    pub indices: Vec<usize>,
}

/// Partition `transforms`/`indices` by `split_values`, first-occurrence order.
///
/// All three slices must have the same length; otherwise `None` and nothing is recorded.
/// Metadata for each split value comes from the first instance carrying it.
pub fn partition_instances(
    transforms: &[Transform],
    indices: &[usize],
    split_values: &[String],
    sources: &PerSplitSources,
    per_split: &mut PerSplitMap,
) -> Option<Vec<SplitGroup>> {
    if transforms.len() != indices.len() || split_values.len() != indices.len() {
        return None;
    }

    let mut groups: Vec<SplitGroup> = Vec::new();
    let mut slot: HashMap<&str, usize> = HashMap::new();
    for ((t, &index), value) in transforms.iter().zip(indices).zip(split_values) {
        let g = *slot.entry(value.as_str()).or_insert_with(|| {
            groups.push(SplitGroup { value: value.clone(), transforms: Vec::new(), indices: Vec::new() });
            groups.len() - 1
        });
        groups[g].transforms.push(*t);
        groups[g].indices.push(index);

        per_split.entry(value.clone()).or_insert_with(|| sources.at(index));
    }
    Some(groups)
}
