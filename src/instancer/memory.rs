// src/instancer/memory.rs
//! In-memory attribute reader and object resolver.
//! Hosts use it as a fixture source; the crate's tests drive whole cooks with it.

use bevy::prelude::*;
use std::collections::HashMap;

use super::attributes::{AttributeArray, AttributeOwner, AttributeReader};
use super::core::{GeometryPartDescriptor, ObjectRef, ObjectResolver};

/// Engine-side data of one part.
#[derive(Clone, Debug, Default)]
pub struct MemoryPart {
    pub transforms: Option<Vec<Transform>>,
    pub instanced_part_ids: Option<Vec<i32>>,
    pub instanced_object_ids: Option<Vec<i32>>,
    pub attributes: HashMap<(String, AttributeOwner), AttributeArray>,
}

impl MemoryPart {
    pub fn with_transforms(mut self, transforms: Vec<Transform>) -> Self {
        self.transforms = Some(transforms);
        self
    }

    pub fn with_instanced_part_ids(mut self, ids: Vec<i32>) -> Self {
        self.instanced_part_ids = Some(ids);
        self
    }

    pub fn with_instanced_object_ids(mut self, ids: Vec<i32>) -> Self {
        self.instanced_object_ids = Some(ids);
        self
    }

    pub fn with_attribute(mut self, name: &str, owner: AttributeOwner, values: AttributeArray) -> Self {
        self.attributes.insert((name.to_string(), owner), values);
        self
    }

    /// String attribute shorthand.
    pub fn with_strings(self, name: &str, owner: AttributeOwner, values: &[&str]) -> Self {
        let values = values.iter().map(|s| s.to_string()).collect();
        self.with_attribute(name, owner, AttributeArray::Str(values))
    }
}

/// Parts keyed by (object, geo, part) id plus a table of loadable objects.
#[derive(Clone, Debug, Default)]
pub struct MemoryEngine {
    pub parts: HashMap<(i32, i32, i32), MemoryPart>,
    pub objects: HashMap<String, ObjectRef>,
}

impl MemoryEngine {
    pub fn with_part(mut self, part: &GeometryPartDescriptor, data: MemoryPart) -> Self {
        self.set_part(part, data);
        self
    }

    pub fn with_object(mut self, object: ObjectRef) -> Self {
        self.objects.insert(object.path.clone(), object);
        self
    }

    pub fn set_part(&mut self, part: &GeometryPartDescriptor, data: MemoryPart) {
        self.parts.insert((part.object_id, part.geo_id, part.part_id), data);
    }

    pub fn remove_object(&mut self, path: &str) -> Option<ObjectRef> {
        self.objects.remove(path)
    }

    fn part(&self, part: &GeometryPartDescriptor) -> Option<&MemoryPart> {
        self.parts.get(&(part.object_id, part.geo_id, part.part_id))
    }
}

impl AttributeReader for MemoryEngine {
    fn instance_transforms(&self, part: &GeometryPartDescriptor) -> Option<Vec<Transform>> {
        self.part(part)?.transforms.clone()
    }

    fn instanced_part_ids(&self, part: &GeometryPartDescriptor) -> Option<Vec<i32>> {
        self.part(part)?.instanced_part_ids.clone()
    }

    fn instanced_object_ids(&self, part: &GeometryPartDescriptor) -> Option<Vec<i32>> {
        self.part(part)?.instanced_object_ids.clone()
    }

    fn attribute(&self, part: &GeometryPartDescriptor, name: &str, owner: AttributeOwner) -> AttributeArray {
        self.part(part)
            .and_then(|p| p.attributes.get(&(name.to_string(), owner)))
            .cloned()
            .unwrap_or_default()
    }

    fn attribute_names(&self, part: &GeometryPartDescriptor, owner: AttributeOwner) -> Vec<String> {
        let Some(p) = self.part(part) else { return Vec::new() };
        let mut names: Vec<String> = p
            .attributes
            .keys()
            .filter(|(_, o)| *o == owner)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }
}

impl ObjectResolver for MemoryEngine {
    fn resolve(&self, path: &str) -> Option<ObjectRef> {
        self.objects.get(path).cloned()
    }
}
