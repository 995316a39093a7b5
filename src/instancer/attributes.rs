// src/instancer/attributes.rs
//! Read-only view of the procedural engine's attribute layer.
//!
//! Attribute arrays are a tagged union over the storage type with an explicit
//! `Missing` case, so callers never branch on an "exists" flag next to an array.

use bevy::prelude::*;

use super::core::GeometryPartDescriptor;

/// Which element class an attribute is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeOwner {
    Vertex,
    Point,
    Prim,
    Detail,
}

/// Search order used when the owner does not matter.
pub const ANY_OWNER: [AttributeOwner; 4] =
    [AttributeOwner::Point, AttributeOwner::Vertex, AttributeOwner::Prim, AttributeOwner::Detail];

/// One attribute array as returned by the engine.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum AttributeArray {
    #[default]
    Missing,
    Int(Vec<i32>),
    Float(Vec<f32>),
    Str(Vec<String>),
}

/// A single value read out of an [`AttributeArray`].
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Int(i32),
    Float(f32),
    Str(String),
}

impl AttributeArray {
    #[inline]
    pub fn exists(&self) -> bool {
        !matches!(self, AttributeArray::Missing)
    }

    pub fn len(&self) -> usize {
        match self {
            AttributeArray::Missing => 0,
            AttributeArray::Int(v) => v.len(),
            AttributeArray::Float(v) => v.len(),
            AttributeArray::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Strings, converting numbers the way the engine does.
    pub fn to_strings(&self) -> Option<Vec<String>> {
        match self {
            AttributeArray::Missing => None,
            AttributeArray::Str(v) => Some(v.clone()),
            AttributeArray::Int(v) => Some(v.iter().map(|x| x.to_string()).collect()),
            AttributeArray::Float(v) => Some(v.iter().map(|x| x.to_string()).collect()),
        }
    }

    /// Integers; floats truncate, strings do not convert.
    pub fn to_ints(&self) -> Option<Vec<i32>> {
        match self {
            AttributeArray::Int(v) => Some(v.clone()),
            AttributeArray::Float(v) => Some(v.iter().map(|x| *x as i32).collect()),
            AttributeArray::Missing | AttributeArray::Str(_) => None,
        }
    }

    pub fn to_floats(&self) -> Option<Vec<f32>> {
        match self {
            AttributeArray::Float(v) => Some(v.clone()),
            AttributeArray::Int(v) => Some(v.iter().map(|x| *x as f32).collect()),
            AttributeArray::Missing | AttributeArray::Str(_) => None,
        }
    }

    /// Value at `index`, or the first value for detail attributes.
    pub fn value_at(&self, owner: AttributeOwner, index: usize) -> Option<AttributeValue> {
        let i = if owner == AttributeOwner::Detail { 0 } else { index };
        match self {
            AttributeArray::Missing => None,
            AttributeArray::Int(v) => v.get(i).copied().map(AttributeValue::Int),
            AttributeArray::Float(v) => v.get(i).copied().map(AttributeValue::Float),
            AttributeArray::Str(v) => v.get(i).cloned().map(AttributeValue::Str),
        }
    }
}

/// Everything the cook needs from the procedural engine, per part.
pub trait AttributeReader: Send + Sync {
    /// Instance transforms of an instancer part.
    fn instance_transforms(&self, part: &GeometryPartDescriptor) -> Option<Vec<Transform>>;

    /// Packed primitives: the part id instanced by each transform.
    fn instanced_part_ids(&self, part: &GeometryPartDescriptor) -> Option<Vec<i32>>;

    /// Legacy instancers: the object id instanced by each point.
    fn instanced_object_ids(&self, part: &GeometryPartDescriptor) -> Option<Vec<i32>>;

    fn attribute(&self, part: &GeometryPartDescriptor, name: &str, owner: AttributeOwner) -> AttributeArray;

    /// Names of all attributes on `owner`.
    fn attribute_names(&self, part: &GeometryPartDescriptor, owner: AttributeOwner) -> Vec<String>;
}

/// First owner in `owners` carrying `name`.
pub fn find_attribute(
    reader: &dyn AttributeReader,
    part: &GeometryPartDescriptor,
    name: &str,
    owners: &[AttributeOwner],
) -> Option<(AttributeOwner, AttributeArray)> {
    owners.iter().find_map(|&owner| {
        let arr = reader.attribute(part, name, owner);
        arr.exists().then_some((owner, arr))
    })
}

/// True if the integer attribute exists on any of `owners` and its first value is non-zero.
pub fn flag_attribute(
    reader: &dyn AttributeReader,
    part: &GeometryPartDescriptor,
    name: &str,
    owners: &[AttributeOwner],
) -> bool {
    find_attribute(reader, part, name, owners)
        .and_then(|(_, arr)| arr.to_ints())
        .and_then(|v| v.first().copied())
        .is_some_and(|v| v != 0)
}

/// String attribute indexed by original instance index; detail values broadcast.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexedStrings {
    pub owner: Option<AttributeOwner>,
    pub values: Vec<String>,
}

impl IndexedStrings {
    pub fn read(
        reader: &dyn AttributeReader,
        part: &GeometryPartDescriptor,
        name: &str,
        owners: &[AttributeOwner],
    ) -> Option<Self> {
        let (owner, arr) = find_attribute(reader, part, name, owners)?;
        Some(Self { owner: Some(owner), values: arr.to_strings()? })
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        let i = if self.owner == Some(AttributeOwner::Detail) { 0 } else { index };
        self.values.get(i).map(String::as_str)
    }
}

/// Integer counterpart of [`IndexedStrings`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexedInts {
    pub owner: Option<AttributeOwner>,
    pub values: Vec<i32>,
}

impl IndexedInts {
    pub fn read(
        reader: &dyn AttributeReader,
        part: &GeometryPartDescriptor,
        name: &str,
        owners: &[AttributeOwner],
    ) -> Option<Self> {
        let (owner, arr) = find_attribute(reader, part, name, owners)?;
        Some(Self { owner: Some(owner), values: arr.to_ints()? })
    }

    pub fn get(&self, index: usize) -> Option<i32> {
        let i = if self.owner == Some(AttributeOwner::Detail) { 0 } else { index };
        self.values.get(i).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instancer::core::{InstancerKind, PartType};
    use crate::instancer::memory::{MemoryEngine, MemoryPart};

    fn part() -> GeometryPartDescriptor {
        GeometryPartDescriptor::new(0, 0, 0, "p", PartType::Instancer(InstancerKind::AttributeInstancer))
    }

    #[test]
    fn coercions_follow_engine_rules() {
        let ints = AttributeArray::Int(vec![1, 2]);
        assert_eq!(ints.to_strings(), Some(vec!["1".to_string(), "2".to_string()]));
        assert_eq!(ints.to_floats(), Some(vec![1.0, 2.0]));
        assert_eq!(AttributeArray::Float(vec![2.7]).to_ints(), Some(vec![2]));
        assert_eq!(AttributeArray::Str(vec!["x".into()]).to_ints(), None);
        assert!(!AttributeArray::Missing.exists());
    }

    #[test]
    fn detail_values_broadcast_to_every_index() {
        let arr = AttributeArray::Str(vec!["a".into()]);
        assert_eq!(arr.value_at(AttributeOwner::Detail, 5), Some(AttributeValue::Str("a".into())));
        assert_eq!(arr.value_at(AttributeOwner::Point, 5), None);

        let idx = IndexedStrings { owner: Some(AttributeOwner::Detail), values: vec!["lvl".into()] };
        assert_eq!(idx.get(3), Some("lvl"));
    }

    #[test]
    fn find_attribute_respects_owner_order() {
        let p = part();
        let engine = MemoryEngine::default().with_part(
            &p,
            MemoryPart::default()
                .with_attribute("tile", AttributeOwner::Detail, AttributeArray::Int(vec![9]))
                .with_attribute("tile", AttributeOwner::Prim, AttributeArray::Int(vec![1, 2])),
        );
        let (owner, arr) = find_attribute(&engine, &p, "tile", &ANY_OWNER).expect("found");
        assert_eq!(owner, AttributeOwner::Prim);
        assert_eq!(arr, AttributeArray::Int(vec![1, 2]));
        assert!(find_attribute(&engine, &p, "nope", &ANY_OWNER).is_none());
    }

    #[test]
    fn flags_are_non_zero_first_values() {
        let p = part();
        let engine = MemoryEngine::default().with_part(
            &p,
            MemoryPart::default()
                .with_attribute("on", AttributeOwner::Detail, AttributeArray::Int(vec![1]))
                .with_attribute("off", AttributeOwner::Detail, AttributeArray::Int(vec![0])),
        );
        assert!(flag_attribute(&engine, &p, "on", &ANY_OWNER));
        assert!(!flag_attribute(&engine, &p, "off", &ANY_OWNER));
        assert!(!flag_attribute(&engine, &p, "missing", &ANY_OWNER));
    }
}
