// src/instancer/core.rs
//! Core types for instancer reconciliation: part descriptors, output identifiers,
//! referenced objects. Keep this file dependency-light; everything else builds on it.

use bevy::prelude::*; // Transform
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

// ---------- Attribute names read from the procedural engine ----------

pub const ATTR_INSTANCE: &str = "instance";
pub const ATTR_INSTANCE_OVERRIDE: &str = "unreal_instance";
pub const ATTR_SPLIT_ATTR: &str = "unreal_split_attr";
pub const ATTR_SPLIT_INSTANCES: &str = "unreal_split_instances";
pub const ATTR_FOLIAGE_INSTANCER: &str = "unreal_foliage";
pub const ATTR_HIERARCHICAL_INSTANCER: &str = "unreal_hierarchical_instancer";
pub const ATTR_FORCE_INSTANCER: &str = "unreal_force_instancer";
pub const ATTR_NUM_CUSTOM_FLOATS: &str = "unreal_num_custom_floats";
pub const ATTR_CUSTOM_DATA_PREFIX: &str = "unreal_per_instance_custom_data";
pub const ATTR_MATERIAL: &str = "unreal_material";
pub const ATTR_PROPERTY_PREFIX: &str = "unreal_uproperty_";
pub const ATTR_LEVEL_PATH: &str = "unreal_level_path";
pub const ATTR_OUTPUT_NAME: &str = "unreal_output_name";
pub const ATTR_BAKE_NAME: &str = "unreal_bake_name";
pub const ATTR_BAKE_ACTOR: &str = "unreal_bake_actor";
pub const ATTR_BAKE_ACTOR_CLASS: &str = "unreal_bake_actor_class";
pub const ATTR_BAKE_FOLDER: &str = "unreal_bake_folder";
pub const ATTR_BAKE_OUTLINER_FOLDER: &str = "unreal_bake_outliner_folder";
pub const ATTR_TILE: &str = "tile";

/// Smallest scale magnitude an instance may end up with after offsets.
pub const SCALE_SMALL_VALUE: f32 = 1.0e-8 * 2.0;

// ---------- Parts ----------

/// How an instancer part encodes its instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstancerKind {
    /// Packed primitives: transforms + instanced part ids.
    PackedPrimitive,
    /// `instance` / `unreal_instance` string attribute naming assets or classes.
    AttributeInstancer,
    /// Per-point integer object ids.
    LegacyAttributeInstancer,
    /// One object id for the whole part.
    ObjectInstancer,
}

/// What a geometry part is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartType {
    Mesh,
    Instancer(InstancerKind),
    Other,
}

/// One evaluated geometry unit. Produced fresh every cook.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryPartDescriptor {
    pub object_id: i32,
    pub geo_id: i32,
    pub part_id: i32,
    pub object_name: String,
    pub part_name: String,
    pub part_type: PartType,
    /// Mesh parts only: true when the part is the source of an instancer.
    pub is_instanced: bool,
    /// Object instancers only: id of the object whose parts get instanced.
    pub object_to_instance_id: i32,
    pub transform: Transform,
}

impl GeometryPartDescriptor {
    pub fn new(object_id: i32, geo_id: i32, part_id: i32, part_name: impl Into<String>, part_type: PartType) -> Self {
        Self {
            object_id,
            geo_id,
            part_id,
            object_name: String::new(),
            part_name: part_name.into(),
            part_type,
            is_instanced: false,
            object_to_instance_id: -1,
            transform: Transform::IDENTITY,
        }
    }

    #[inline]
    pub fn instancer_kind(&self) -> Option<InstancerKind> {
        match self.part_type {
            PartType::Instancer(kind) => Some(kind),
            _ => None,
        }
    }

    #[inline]
    pub fn is_mesh(&self) -> bool {
        self.part_type == PartType::Mesh
    }
}

// ---------- Output identity ----------

/// Stable key of one logical output across cooks.
///
/// Equality and hashing only look at the numeric ids and the split identifier.
/// `loaded` marks identifiers restored from a previous session whose numeric ids
/// may be stale; [`rebind_loaded`] patches them by structural identity (part name).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OutputObjectIdentifier {
    pub object_id: i32,
    pub geo_id: i32,
    pub part_id: i32,
    pub part_name: String,
    pub split_identifier: String,
    #[serde(skip_serializing, default = "restored_is_loaded")]
    pub loaded: bool,
}

fn restored_is_loaded() -> bool {
    true
}

impl OutputObjectIdentifier {
    /// Identifier of a part with the given split identifier.
    pub fn for_part(part: &GeometryPartDescriptor, split: impl Into<String>) -> Self {
        Self {
            object_id: part.object_id,
            geo_id: part.geo_id,
            part_id: part.part_id,
            part_name: part.part_name.clone(),
            split_identifier: split.into(),
            loaded: false,
        }
    }

    /// Same ids/part name, different split identifier.
    pub fn with_split(&self, split: impl Into<String>) -> Self {
        Self { split_identifier: split.into(), loaded: false, ..self.clone() }
    }

    /// Does this identifier describe an output of `part`?
    /// Loaded identifiers can only be trusted by part name.
    pub fn matches(&self, part: &GeometryPartDescriptor) -> bool {
        if self.loaded {
            return self.part_name == part.part_name;
        }
        self.same_ids(part)
    }

    #[inline]
    pub fn ids(&self) -> (i32, i32, i32) {
        (self.object_id, self.geo_id, self.part_id)
    }

    #[inline]
    pub fn same_ids(&self, part: &GeometryPartDescriptor) -> bool {
        self.object_id == part.object_id && self.geo_id == part.geo_id && self.part_id == part.part_id
    }

    /// Copy the current cook's ids onto this identifier and clear the loaded marker.
    pub fn adopt_ids(&mut self, part: &GeometryPartDescriptor) {
        self.object_id = part.object_id;
        self.geo_id = part.geo_id;
        self.part_id = part.part_id;
        self.part_name = part.part_name.clone();
        self.loaded = false;
    }
}

impl PartialEq for OutputObjectIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id
            && self.geo_id == other.geo_id
            && self.part_id == other.part_id
            && self.split_identifier == other.split_identifier
    }
}

impl Eq for OutputObjectIdentifier {}

impl Hash for OutputObjectIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_id.hash(state);
        self.geo_id.hash(state);
        self.part_id.hash(state);
        self.split_identifier.hash(state);
    }
}

impl fmt::Display for OutputObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} '{}' [{}]",
            self.object_id, self.geo_id, self.part_id, self.part_name, self.split_identifier
        )
    }
}

/// Which current part each set of restored ids now belongs to.
///
/// A part whose ids and name still equal the restored ones keeps them. The rest go,
/// in id order, to the first same-named part that nothing else holds.
#[derive(Clone, Debug, Default)]
pub struct RebindPlan {
    targets: HashMap<(i32, i32, i32), GeometryPartDescriptor>,
}

/// Result of applying a [`RebindPlan`] to one map.
#[derive(Debug)]
pub struct Rebound<V> {
    pub patched: usize,
    /// Entries whose new and old keys were both taken.
    pub orphaned: Vec<(OutputObjectIdentifier, V)>,
}

impl RebindPlan {
    /// Plan over every key of every map that will be rebound, so all maps agree.
    pub fn new<'k>(parts: &[GeometryPartDescriptor], keys: impl IntoIterator<Item = &'k OutputObjectIdentifier>) -> Self {
        let mut held = vec![false; parts.len()];
        let mut loaded: Vec<&OutputObjectIdentifier> = Vec::new();
        for key in keys {
            if key.loaded {
                loaded.push(key);
            } else if let Some(i) = parts.iter().position(|p| key.same_ids(p)) {
                held[i] = true;
            }
        }
        loaded.sort_by(|a, b| a.ids().cmp(&b.ids()).then_with(|| a.split_identifier.cmp(&b.split_identifier)));

        let mut claimed: HashMap<(i32, i32, i32), usize> = HashMap::new();
        for key in &loaded {
            if claimed.contains_key(&key.ids()) {
                continue;
            }
            if let Some(i) = parts.iter().position(|p| key.same_ids(p) && p.part_name == key.part_name) {
                held[i] = true;
                claimed.insert(key.ids(), i);
            }
        }
        for key in &loaded {
            if claimed.contains_key(&key.ids()) {
                continue;
            }
            if let Some(i) = (0..parts.len()).find(|&i| !held[i] && parts[i].part_name == key.part_name) {
                held[i] = true;
                claimed.insert(key.ids(), i);
            }
        }

        let targets = claimed.into_iter().map(|(ids, i)| (ids, parts[i].clone())).collect();
        Self { targets }
    }

    /// Re-key the loaded entries of `map`. An entry never replaces another one: when its
    /// new key is taken it stays loaded under its old key.
    pub fn apply<V>(&self, map: &mut HashMap<OutputObjectIdentifier, V>) -> Rebound<V> {
        let mut loaded: Vec<OutputObjectIdentifier> = map.keys().filter(|k| k.loaded).cloned().collect();
        loaded.sort_by(|a, b| a.ids().cmp(&b.ids()).then_with(|| a.split_identifier.cmp(&b.split_identifier)));

        let mut rebound = Rebound { patched: 0, orphaned: Vec::new() };
        for old_key in loaded {
            let Some(part) = self.targets.get(&old_key.ids()) else { continue };
            let Some(value) = map.remove(&old_key) else { continue };
            let mut new_key = old_key.clone();
            new_key.adopt_ids(part);
            if !map.contains_key(&new_key) {
                map.insert(new_key, value);
                rebound.patched += 1;
            } else if !map.contains_key(&old_key) {
                map.insert(old_key, value);
            } else {
                rebound.orphaned.push((old_key, value));
            }
        }
        rebound
    }
}

// ---------- Referenced objects ----------

/// Closed set of things an instancer can reference, resolved once per object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Full-fidelity mesh. `foliage_type` marks foliage-type assets wrapping a mesh.
    Mesh { lod_count: u32, foliage_type: bool },
    /// Lightweight mesh used until the full mesh is built.
    ProxyMesh,
    /// A class: instanced by spawning one actor per instance.
    Class,
    Other,
}

/// A renderable object an instancer points at.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub path: String,
    pub kind: ObjectKind,
}

impl ObjectRef {
    pub fn new(path: impl Into<String>, kind: ObjectKind) -> Self {
        Self { path: path.into(), kind }
    }

    pub fn mesh(path: impl Into<String>) -> Self {
        Self::new(path, ObjectKind::Mesh { lod_count: 1, foliage_type: false })
    }
}

/// Loads referenced objects. Injected into every cook, never global.
pub trait ObjectResolver: Send + Sync {
    /// Synchronously load the object at `path`, or find a class with that name.
    fn resolve(&self, path: &str) -> Option<ObjectRef>;

    /// Whether a previously resolved object can still be used.
    fn is_valid(&self, object: &ObjectRef) -> bool {
        self.resolve(&object.path).is_some()
    }
}

// ---------- Previously translated meshes ----------

/// A mesh part translated earlier in this cook (or kept from the previous one).
#[derive(Clone, Debug)]
pub struct TranslatedMesh {
    pub identifier: OutputObjectIdentifier,
    pub part: GeometryPartDescriptor,
    pub object: Option<ObjectRef>,
    pub proxy: Option<ObjectRef>,
    /// The proxy is newer than `object`.
    pub proxy_is_current: bool,
}

impl TranslatedMesh {
    pub fn new(part: GeometryPartDescriptor, object: ObjectRef) -> Self {
        Self {
            identifier: OutputObjectIdentifier::for_part(&part, ""),
            part,
            object: Some(object),
            proxy: None,
            proxy_is_current: false,
        }
    }

    /// Object to instance for `instance_count` copies: the proxy only for single instances.
    pub fn object_for(&self, instance_count: usize) -> Option<&ObjectRef> {
        if instance_count <= 1 && self.proxy_is_current {
            if let Some(proxy) = self.proxy.as_ref() {
                return Some(proxy);
            }
        }
        self.object.as_ref()
    }
}

/// All mesh outputs an instancer may point at.
#[derive(Clone, Debug, Default)]
pub struct TranslatedMeshes {
    pub meshes: Vec<TranslatedMesh>,
}

impl TranslatedMeshes {
    pub fn push(&mut self, mesh: TranslatedMesh) {
        self.meshes.push(mesh);
    }

    /// Meshes that were produced for `part`.
    pub fn matching<'a>(&'a self, part: &'a GeometryPartDescriptor) -> impl Iterator<Item = &'a TranslatedMesh> + 'a {
        self.meshes.iter().filter(move |m| m.identifier.matches(part))
    }

    /// Mesh part with exactly these ids.
    pub fn find_part(&self, object_id: i32, geo_id: i32, part_id: i32) -> Option<&GeometryPartDescriptor> {
        self.meshes
            .iter()
            .map(|m| &m.part)
            .find(|p| p.object_id == object_id && p.geo_id == geo_id && p.part_id == part_id)
    }

    /// Mesh parts of object `object_id`, optionally skipping instanced ones.
    pub fn parts_of_object(&self, object_id: i32, skip_instanced: bool) -> Vec<GeometryPartDescriptor> {
        let mut out: Vec<GeometryPartDescriptor> = Vec::new();
        for m in &self.meshes {
            if !m.part.is_mesh() || m.part.object_id != object_id {
                continue;
            }
            if skip_instanced && m.part.is_instanced {
                continue;
            }
            if !out.iter().any(|p| p == &m.part) {
                out.push(m.part.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(obj: i32, geo: i32, id: i32, name: &str) -> GeometryPartDescriptor {
        GeometryPartDescriptor::new(obj, geo, id, name, PartType::Instancer(InstancerKind::PackedPrimitive))
    }

    fn rebind_loaded<V>(map: &mut HashMap<OutputObjectIdentifier, V>, parts: &[GeometryPartDescriptor]) -> Rebound<V> {
        let plan = RebindPlan::new(parts, map.keys());
        plan.apply(map)
    }

    #[test]
    fn identifier_equality_ignores_name_and_loaded_flag() {
        let p = part(1, 2, 3, "trees");
        let a = OutputObjectIdentifier::for_part(&p, "0_1");
        let mut b = a.clone();
        b.part_name = "renamed".into();
        b.loaded = true;
        assert_eq!(a, b);
        assert_ne!(a, a.with_split("0_2"));
    }

    #[test]
    fn loaded_identifiers_rebind_by_part_name() {
        let old = part(10, 11, 12, "trees");
        let current = part(20, 21, 22, "trees");
        let mut key = OutputObjectIdentifier::for_part(&old, "0");
        key.loaded = true;

        let mut map = HashMap::new();
        map.insert(key, 7u32);
        assert_eq!(rebind_loaded(&mut map, std::slice::from_ref(&current)).patched, 1);

        let expected = OutputObjectIdentifier::for_part(&current, "0");
        assert_eq!(map.get(&expected), Some(&7));
        assert!(map.keys().all(|k| !k.loaded));
    }

    #[test]
    fn loaded_identifier_without_structural_match_is_left_alone() {
        let mut key = OutputObjectIdentifier::for_part(&part(1, 1, 1, "rocks"), "0");
        key.loaded = true;
        let mut map = HashMap::new();
        map.insert(key.clone(), ());
        assert_eq!(rebind_loaded(&mut map, &[part(2, 2, 2, "trees")]).patched, 0);
        assert!(map.keys().next().is_some_and(|k| k.loaded));
    }

    fn restored(p: &GeometryPartDescriptor, split: &str) -> OutputObjectIdentifier {
        let mut key = OutputObjectIdentifier::for_part(p, split);
        key.loaded = true;
        key
    }

    #[test]
    fn same_named_parts_keep_their_own_entries() {
        let a = part(1, 0, 1, "scatter");
        let b = part(2, 0, 2, "scatter");
        let mut map = HashMap::new();
        map.insert(restored(&a, "0_0"), "a");
        map.insert(restored(&b, "0_0"), "b");

        let rebound = rebind_loaded(&mut map, &[a.clone(), b.clone()]);
        assert_eq!(rebound.patched, 2);
        assert!(rebound.orphaned.is_empty());
        assert_eq!(map.get(&OutputObjectIdentifier::for_part(&a, "0_0")), Some(&"a"));
        assert_eq!(map.get(&OutputObjectIdentifier::for_part(&b, "0_0")), Some(&"b"));
    }

    #[test]
    fn stale_same_named_ids_spread_over_distinct_parts() {
        let mut map = HashMap::new();
        map.insert(restored(&part(1, 0, 1, "scatter"), "0_0"), 1);
        map.insert(restored(&part(1, 0, 1, "scatter"), "1_0"), 2);
        map.insert(restored(&part(2, 0, 2, "scatter"), "0_0"), 3);

        let now = [part(5, 0, 5, "scatter"), part(6, 0, 6, "scatter")];
        let rebound = rebind_loaded(&mut map, &now);
        assert_eq!(rebound.patched, 3);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&OutputObjectIdentifier::for_part(&now[0], "0_0")), Some(&1));
        assert_eq!(map.get(&OutputObjectIdentifier::for_part(&now[0], "1_0")), Some(&2));
        assert_eq!(map.get(&OutputObjectIdentifier::for_part(&now[1], "0_0")), Some(&3));
    }

    #[test]
    fn parts_held_by_current_entries_are_not_claimed() {
        let now = part(5, 0, 5, "scatter");
        let mut map = HashMap::new();
        map.insert(OutputObjectIdentifier::for_part(&now, "0_0"), "current");
        map.insert(restored(&part(1, 0, 1, "scatter"), "0_0"), "old");

        assert_eq!(rebind_loaded(&mut map, std::slice::from_ref(&now)).patched, 0);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&OutputObjectIdentifier::for_part(&now, "0_0")), Some(&"current"));
    }

    #[test]
    fn taken_key_leaves_the_entry_loaded() {
        let now = part(5, 0, 5, "scatter");
        let mut map = HashMap::new();
        map.insert(restored(&part(1, 0, 1, "scatter"), "0_0"), "moving");
        map.insert(restored(&part(5, 0, 5, "other"), "0_0"), "squatter");

        let rebound = rebind_loaded(&mut map, std::slice::from_ref(&now));
        assert_eq!(rebound.patched, 0);
        assert!(rebound.orphaned.is_empty());
        assert_eq!(map.len(), 2);
        assert!(map.keys().all(|k| k.loaded));
        assert_eq!(map.get(&restored(&part(1, 0, 1, "scatter"), "0_0")), Some(&"moving"));
    }

    #[test]
    fn deserialized_identifiers_are_marked_loaded() {
        let id = OutputObjectIdentifier::for_part(&part(1, 2, 3, "trees"), "0_0");
        let text = ron::to_string(&id).expect("serialize");
        let back: OutputObjectIdentifier = ron::from_str(&text).expect("deserialize");
        assert!(back.loaded);
        assert_eq!(back, id);
    }

    #[test]
    fn single_instance_prefers_current_proxy() {
        let mut mesh = TranslatedMesh::new(part(1, 1, 1, "m"), ObjectRef::mesh("/Game/full"));
        mesh.proxy = Some(ObjectRef::new("/Game/proxy", ObjectKind::ProxyMesh));
        mesh.proxy_is_current = true;
        assert_eq!(mesh.object_for(1).map(|o| o.path.as_str()), Some("/Game/proxy"));
        assert_eq!(mesh.object_for(2).map(|o| o.path.as_str()), Some("/Game/full"));
    }
}
