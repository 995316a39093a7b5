// src/instancer/variation.rs
//! Per-original-object variation state and its realization into instance subsets.
//!
//! An [`InstancedOutput`] survives across cooks. Each cook refreshes its original
//! object/transforms, prunes variations that no longer resolve, and re-assigns a
//! variation to each transform only when the transform count changes, so unchanged
//! inputs realize the same subsets every time.

use bevy::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::context::CookContext;
use super::core::{ObjectRef, ObjectResolver, OutputObjectIdentifier};
use super::normalize::InstancerTuple;
use super::settings::VariationGenerator;

/// Which part of a transform offset an edit addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffsetChannel {
    Translation,
    /// Euler degrees: x = roll, y = pitch, z = yaw.
    Rotation,
    Scale,
}

/// Variation state of one original object.
#[derive(Clone, Debug, PartialEq)]
pub struct InstancedOutput {
    pub original_object: ObjectRef,
    /// The original object stands in for a reference that did not resolve.
    pub original_is_placeholder: bool,
    pub original_transforms: Vec<Transform>,
    pub original_indices: Vec<usize>,
    pub variation_objects: Vec<ObjectRef>,
    pub variation_offsets: Vec<Transform>,
    /// Variation picked by each original transform.
    pub variation_indices: Vec<usize>,
    pub stale: bool,
    changed: bool,
}

impl InstancedOutput {
    /// New output with the original as its single variation.
    pub fn new(original_object: ObjectRef, transforms: Vec<Transform>, indices: Vec<usize>) -> Self {
        let count = transforms.len();
        Self {
            variation_objects: vec![original_object.clone()],
            variation_offsets: vec![Transform::IDENTITY],
            variation_indices: vec![0; count],
            original_object,
            original_is_placeholder: false,
            original_transforms: transforms,
            original_indices: indices,
            stale: false,
            changed: false,
        }
    }

    #[inline]
    pub fn variation_count(&self) -> usize {
        self.variation_objects.len()
    }

    #[inline]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_changed(&mut self, changed: bool) {
        self.changed = changed;
    }

    /// Replace variation `index`. Growing pads with `object` and identity offsets.
    pub fn set_variation_object_at(&mut self, index: usize, object: ObjectRef) {
        if index >= self.variation_objects.len() {
            self.variation_objects.resize(index + 1, object);
            self.variation_offsets.resize(index + 1, Transform::IDENTITY);
            self.variation_indices.clear();
        } else {
            self.variation_objects[index] = object;
        }
        self.changed = true;
    }

    /// Append a variation; returns its index.
    pub fn add_variation(&mut self, object: ObjectRef, offset: Transform) -> usize {
        self.variation_objects.push(object);
        self.variation_offsets.push(offset);
        self.variation_indices.clear();
        self.changed = true;
        self.variation_objects.len() - 1
    }

    pub fn remove_variation_at(&mut self, index: usize) -> Option<ObjectRef> {
        if index >= self.variation_objects.len() {
            return None;
        }
        let removed = self.variation_objects.remove(index);
        if index < self.variation_offsets.len() {
            self.variation_offsets.remove(index);
        }
        self.variation_indices.clear();
        self.changed = true;
        Some(removed)
    }

    /// Current value of one offset component, or `None` for out-of-range arguments.
    pub fn transform_offset_at(&self, variation: usize, channel: OffsetChannel, axis: usize) -> Option<f32> {
        let offset = self.variation_offsets.get(variation)?;
        let v = match channel {
            OffsetChannel::Translation => offset.translation,
            OffsetChannel::Rotation => rotation_degrees(offset.rotation),
            OffsetChannel::Scale => offset.scale,
        };
        (axis < 3).then(|| v[axis])
    }

    /// Set one offset component. Returns false when out of range or unchanged.
    pub fn set_transform_offset_at(&mut self, variation: usize, channel: OffsetChannel, axis: usize, value: f32) -> bool {
        if axis >= 3 || variation >= self.variation_offsets.len() {
            return false;
        }
        let offset = &mut self.variation_offsets[variation];
        match channel {
            OffsetChannel::Translation => {
                if offset.translation[axis] == value {
                    return false;
                }
                offset.translation[axis] = value;
            }
            OffsetChannel::Rotation => {
                let mut degrees = rotation_degrees(offset.rotation);
                if degrees[axis] == value {
                    return false;
                }
                degrees[axis] = value;
                offset.rotation = Quat::from_euler(
                    EulerRot::XYZ,
                    degrees.x.to_radians(),
                    degrees.y.to_radians(),
                    degrees.z.to_radians(),
                );
            }
            OffsetChannel::Scale => {
                if offset.scale[axis] == value {
                    return false;
                }
                offset.scale[axis] = value;
            }
        }
        self.changed = true;
        true
    }
}

fn rotation_degrees(q: Quat) -> Vec3 {
    let (x, y, z) = q.to_euler(EulerRot::XYZ);
    Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}

/// The instances of one variation of one original object.
#[derive(Clone, Debug, PartialEq)]
pub struct VariationInstances {
    pub object: ObjectRef,
    /// Offset-applied transforms.
    pub transforms: Vec<Transform>,
    /// Positions of these instances in the original transform list.
    pub positions: Vec<usize>,
    /// Original element index of each instance.
    pub original_indices: Vec<usize>,
    pub original_object_index: usize,
    pub variation_index: usize,
    /// Instances of the placeholder substituted for an unresolved original.
    pub is_placeholder: bool,
}

impl VariationInstances {
    /// Split identifier of the output object built from these instances.
    pub fn split_identifier(&self) -> String {
        format!("{}_{}", self.original_object_index, self.variation_index)
    }

    #[inline]
    pub fn first_original_index(&self) -> usize {
        self.original_indices.first().copied().unwrap_or(0)
    }
}

// ---------- Generators ----------

/// The engine's cheap linear congruential generator.
#[derive(Clone, Copy, Debug)]
pub struct LegacyRng {
    seed: i32,
}

impl LegacyRng {
    pub fn new(seed: i32) -> Self {
        Self { seed }
    }

    pub fn next_value(&mut self) -> i32 {
        self.seed = self.seed.wrapping_mul(214013).wrapping_add(2531011);
        (self.seed >> 16) & 0x7FFF
    }
}

/// Pick a variation for each of `count` transforms.
pub fn assign_variations(count: usize, variation_count: usize, generator: VariationGenerator, seed: i32) -> Vec<usize> {
    if variation_count <= 1 {
        return vec![0; count];
    }
    match generator {
        VariationGenerator::Legacy => {
            let mut rng = LegacyRng::new(seed);
            (0..count).map(|_| rng.next_value() as usize % variation_count).collect()
        }
        VariationGenerator::ChaCha => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed as u32 as u64);
            (0..count).map(|_| rng.random_range(0..variation_count)).collect()
        }
    }
}

/// Offsets compose onto an instance transform. Scale axes below `scale_epsilon`
/// become `±scale_epsilon`; zero goes negative.
pub fn apply_offset(transform: &Transform, offset: &Transform, scale_epsilon: f32) -> Transform {
    let mut scale = transform.scale * offset.scale;
    for axis in 0..3 {
        if scale[axis].abs() < scale_epsilon {
            scale[axis] = if scale[axis] > 0.0 { scale_epsilon } else { -scale_epsilon };
        }
    }
    Transform {
        translation: transform.translation + offset.translation,
        rotation: transform.rotation * offset.rotation,
        scale,
    }
}

// ---------- Resolver ----------

/// Maps normalized tuples onto stored [`InstancedOutput`]s and realizes variations.
pub struct VariantResolver<'a> {
    resolver: &'a dyn ObjectResolver,
    generator: VariationGenerator,
    seed: i32,
    scale_epsilon: f32,
}

impl<'a> VariantResolver<'a> {
    pub fn new(resolver: &'a dyn ObjectResolver, generator: VariationGenerator, seed: i32, scale_epsilon: f32) -> Self {
        Self { resolver, generator, seed, scale_epsilon }
    }

    pub fn from_context(ctx: &CookContext<'a>) -> Self {
        Self::new(
            ctx.resolver,
            ctx.settings.variation_generator,
            ctx.settings.variation_seed,
            ctx.settings.scale_epsilon,
        )
    }

    /// Refresh the stored output of every tuple of one part and realize its variations.
    /// `base` identifies the part; tuple `i` is stored under split identifier `"i"`.
    pub fn update(
        &self,
        outputs: &mut HashMap<OutputObjectIdentifier, InstancedOutput>,
        base: &OutputObjectIdentifier,
        tuples: &[InstancerTuple],
    ) -> Vec<VariationInstances> {
        let mut realized = Vec::new();
        for (orig, tuple) in tuples.iter().enumerate() {
            let id = base.with_split(orig.to_string());
            let output = match outputs.entry(id) {
                Entry::Occupied(e) => {
                    let existing = e.into_mut();
                    self.refresh(existing, tuple);
                    existing
                }
                Entry::Vacant(e) => {
                    e.insert(InstancedOutput::new(tuple.object.clone(), tuple.transforms.clone(), tuple.indices.clone()))
                }
            };
            output.original_is_placeholder = tuple.is_placeholder;
            realized.extend(self.realize(output, orig));
            output.stale = false;
        }
        realized
    }

    fn refresh(&self, output: &mut InstancedOutput, tuple: &InstancerTuple) {
        let replaced = (output.original_object != tuple.object)
            .then(|| std::mem::replace(&mut output.original_object, tuple.object.clone()));

        output.original_transforms.clone_from(&tuple.transforms);
        output.original_indices.clone_from(&tuple.indices);

        let before = output.variation_objects.len();
        let mut kept_objects = Vec::with_capacity(before);
        let mut kept_offsets = Vec::with_capacity(before);
        for (i, object) in output.variation_objects.drain(..).enumerate() {
            let is_original = object == output.original_object;
            let dropped = replaced.as_ref() == Some(&object) || (!is_original && !self.resolver.is_valid(&object));
            if dropped {
                continue;
            }
            kept_offsets.push(output.variation_offsets.get(i).copied().unwrap_or(Transform::IDENTITY));
            kept_objects.push(object);
        }
        if kept_objects.len() != before {
            output.variation_indices.clear();
        }
        if kept_objects.is_empty() {
            kept_objects.push(output.original_object.clone());
            kept_offsets.push(Transform::IDENTITY);
        }
        output.variation_objects = kept_objects;
        output.variation_offsets = kept_offsets;
    }

    /// Emit the non-empty subset of each variation, recomputing the assignment if needed.
    /// Clears the changed flag.
    pub fn realize(&self, output: &mut InstancedOutput, original_object_index: usize) -> Vec<VariationInstances> {
        let count = output.original_transforms.len();
        if output.variation_indices.len() != count {
            output.variation_indices = assign_variations(count, output.variation_count(), self.generator, self.seed);
        }

        let mut out = Vec::new();
        for (v, object) in output.variation_objects.iter().enumerate() {
            let offset = output.variation_offsets.get(v).copied().unwrap_or(Transform::IDENTITY);
            let positions: Vec<usize> = output
                .variation_indices
                .iter()
                .enumerate()
                .filter(|&(_, &assigned)| assigned == v)
                .map(|(p, _)| p)
                .collect();
            if positions.is_empty() {
                continue;
            }
            out.push(VariationInstances {
                object: object.clone(),
                transforms: positions
                    .iter()
                    .map(|&p| {
                        let t = &output.original_transforms[p];
                        if offset == Transform::IDENTITY {
                            *t
                        } else {
                            apply_offset(t, &offset, self.scale_epsilon)
                        }
                    })
                    .collect(),
                original_indices: positions.iter().map(|&p| output.original_indices.get(p).copied().unwrap_or(p)).collect(),
                positions,
                original_object_index,
                variation_index: v,
                is_placeholder: output.original_is_placeholder && *object == output.original_object,
            });
        }
        output.changed = false;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instancer::core::{GeometryPartDescriptor, InstancerKind, PartType, SCALE_SMALL_VALUE};
    use crate::instancer::memory::MemoryEngine;
    use proptest::prelude::*;

    fn ts(n: usize) -> Vec<Transform> {
        (0..n).map(|i| Transform::from_xyz(i as f32, 0.0, 0.0)).collect()
    }

    fn tuple(path: &str, n: usize) -> InstancerTuple {
        InstancerTuple {
            object: ObjectRef::mesh(path),
            transforms: ts(n),
            indices: (0..n).collect(),
            split_value: None,
            is_placeholder: false,
        }
    }

    fn base() -> OutputObjectIdentifier {
        let part = GeometryPartDescriptor::new(1, 0, 2, "inst", PartType::Instancer(InstancerKind::AttributeInstancer));
        OutputObjectIdentifier::for_part(&part, "")
    }

    fn engine() -> MemoryEngine {
        MemoryEngine::default()
            .with_object(ObjectRef::mesh("/Game/A"))
            .with_object(ObjectRef::mesh("/Game/B"))
            .with_object(ObjectRef::mesh("/Game/C"))
    }

    #[test]
    fn legacy_generator_matches_reference_sequence() {
        let mut rng = LegacyRng::new(1234);
        assert_eq!(rng.next_value(), 4068);
        let mut again = LegacyRng::new(1234);
        again.next_value();
        assert_eq!(rng.next_value(), again.next_value());
    }

    #[test]
    fn single_variation_assigns_zero() {
        assert_eq!(assign_variations(4, 1, VariationGenerator::Legacy, 1234), vec![0; 4]);
        assert_eq!(assign_variations(3, 0, VariationGenerator::ChaCha, 1234), vec![0; 3]);
    }

    #[test]
    fn new_output_is_one_variation_with_everything() {
        let engine = engine();
        let resolver = VariantResolver::new(&engine, VariationGenerator::Legacy, 1234, SCALE_SMALL_VALUE);
        let mut outputs = HashMap::new();
        let realized = resolver.update(&mut outputs, &base(), &[tuple("/Game/A", 10)]);

        assert_eq!(realized.len(), 1);
        assert_eq!(realized[0].transforms.len(), 10);
        assert_eq!(realized[0].split_identifier(), "0_0");
        let stored = &outputs[&base().with_split("0")];
        assert_eq!(stored.variation_indices, vec![0; 10]);
        assert!(!stored.stale);
    }

    #[test]
    fn two_variations_cover_all_transforms_after_growth() {
        let engine = engine();
        let resolver = VariantResolver::new(&engine, VariationGenerator::Legacy, 1234, SCALE_SMALL_VALUE);
        let mut outputs = HashMap::new();
        resolver.update(&mut outputs, &base(), &[tuple("/Game/A", 50)]);
        outputs
            .get_mut(&base().with_split("0"))
            .expect("stored")
            .add_variation(ObjectRef::mesh("/Game/B"), Transform::IDENTITY);

        let realized = resolver.update(&mut outputs, &base(), &[tuple("/Game/A", 100)]);
        assert_eq!(realized.len(), 2);
        let total: usize = realized.iter().map(|v| v.transforms.len()).sum();
        assert_eq!(total, 100);
        assert!(realized.iter().all(|v| !v.transforms.is_empty()));
    }

    #[test]
    fn unchanged_input_realizes_identically() {
        let engine = engine();
        let resolver = VariantResolver::new(&engine, VariationGenerator::Legacy, 1234, SCALE_SMALL_VALUE);
        let mut outputs = HashMap::new();
        resolver.update(&mut outputs, &base(), &[tuple("/Game/A", 20)]);
        outputs
            .get_mut(&base().with_split("0"))
            .expect("stored")
            .add_variation(ObjectRef::mesh("/Game/B"), Transform::from_xyz(0.0, 5.0, 0.0));

        let first = resolver.update(&mut outputs, &base(), &[tuple("/Game/A", 20)]);
        let second = resolver.update(&mut outputs, &base(), &[tuple("/Game/A", 20)]);
        assert_eq!(first, second);
    }

    #[test]
    fn replaced_original_and_unresolvable_variations_are_dropped() {
        let mut engine = engine();
        let resolver_engine = engine.clone();
        let resolver = VariantResolver::new(&resolver_engine, VariationGenerator::Legacy, 1234, SCALE_SMALL_VALUE);
        let mut outputs = HashMap::new();
        resolver.update(&mut outputs, &base(), &[tuple("/Game/A", 4)]);
        {
            let out = outputs.get_mut(&base().with_split("0")).expect("stored");
            out.add_variation(ObjectRef::mesh("/Game/C"), Transform::IDENTITY);
        }

        // Original changes from A to B: A goes, C stays.
        resolver.update(&mut outputs, &base(), &[tuple("/Game/B", 4)]);
        let out = &outputs[&base().with_split("0")];
        assert_eq!(out.variation_objects, vec![ObjectRef::mesh("/Game/C")]);
        assert_eq!(out.variation_offsets.len(), 1);

        // C disappears from the engine: the original is reinserted.
        engine.remove_object("/Game/C");
        let resolver = VariantResolver::new(&engine, VariationGenerator::Legacy, 1234, SCALE_SMALL_VALUE);
        let realized = resolver.update(&mut outputs, &base(), &[tuple("/Game/B", 4)]);
        let out = &outputs[&base().with_split("0")];
        assert_eq!(out.variation_objects, vec![ObjectRef::mesh("/Game/B")]);
        assert_eq!(realized.len(), 1);
        assert_eq!(realized[0].transforms.len(), 4);
    }

    #[test]
    fn only_the_substituted_original_is_flagged_placeholder() {
        let engine = engine();
        let resolver = VariantResolver::new(&engine, VariationGenerator::Legacy, 1234, SCALE_SMALL_VALUE);
        let mut outputs = HashMap::new();
        let mut substituted = tuple("/Game/A", 50);
        substituted.is_placeholder = true;
        resolver.update(&mut outputs, &base(), &[substituted.clone(), tuple("/Game/A", 3)]);
        outputs
            .get_mut(&base().with_split("0"))
            .expect("stored")
            .add_variation(ObjectRef::mesh("/Game/B"), Transform::IDENTITY);

        let realized = resolver.update(&mut outputs, &base(), &[substituted, tuple("/Game/A", 3)]);
        let flagged: Vec<String> = realized.iter().filter(|v| v.is_placeholder).map(|v| v.split_identifier()).collect();
        assert_eq!(flagged, vec!["0_0".to_string()]);
        assert!(realized.iter().any(|v| v.split_identifier() == "0_1" && !v.is_placeholder));
        assert!(realized.iter().any(|v| v.split_identifier() == "1_0" && !v.is_placeholder));
    }

    #[test]
    fn offsets_compose_and_clamp_scale() {
        let t = Transform { translation: Vec3::new(1.0, 2.0, 3.0), scale: Vec3::new(2.0, -1.0, 1.0), ..Default::default() };
        let offset = Transform { translation: Vec3::X, scale: Vec3::new(0.5, 0.0, 0.0), ..Default::default() };
        let out = apply_offset(&t, &offset, SCALE_SMALL_VALUE);
        assert_eq!(out.translation, Vec3::new(2.0, 2.0, 3.0));
        assert_eq!(out.scale.x, 1.0);
        assert_eq!(out.scale.y, -SCALE_SMALL_VALUE);
        assert_eq!(out.scale.z, -SCALE_SMALL_VALUE);

        let tiny = Transform::from_scale(Vec3::splat(1.0e-9));
        assert_eq!(apply_offset(&tiny, &Transform::from_xyz(1.0, 0.0, 0.0), SCALE_SMALL_VALUE).scale, Vec3::splat(SCALE_SMALL_VALUE));
    }

    #[test]
    fn offset_edits_report_changes() {
        let mut out = InstancedOutput::new(ObjectRef::mesh("/Game/A"), ts(2), vec![0, 1]);
        assert!(out.set_transform_offset_at(0, OffsetChannel::Translation, 1, 3.0));
        assert!(!out.set_transform_offset_at(0, OffsetChannel::Translation, 1, 3.0));
        assert!(out.is_changed());
        assert!(!out.set_transform_offset_at(4, OffsetChannel::Scale, 0, 1.0));
        assert!(out.set_transform_offset_at(0, OffsetChannel::Rotation, 2, 90.0));
        let yaw = out.transform_offset_at(0, OffsetChannel::Rotation, 2).expect("in range");
        assert!((yaw - 90.0).abs() < 1e-3);
        assert_eq!(out.transform_offset_at(0, OffsetChannel::Translation, 1), Some(3.0));
    }

    #[test]
    fn growing_variations_invalidates_assignment() {
        let mut out = InstancedOutput::new(ObjectRef::mesh("/Game/A"), ts(3), vec![0, 1, 2]);
        out.set_variation_object_at(2, ObjectRef::mesh("/Game/B"));
        assert_eq!(out.variation_count(), 3);
        assert_eq!(out.variation_offsets.len(), 3);
        assert!(out.variation_indices.is_empty());
        assert_eq!(out.remove_variation_at(1), Some(ObjectRef::mesh("/Game/B")));
        assert_eq!(out.remove_variation_at(7), None);
    }

    proptest! {
        #[test]
        fn variation_subsets_partition_transforms(n in 0usize..200, extra in 0usize..4, chacha in any::<bool>()) {
            let engine = engine();
            let generator = if chacha { VariationGenerator::ChaCha } else { VariationGenerator::Legacy };
            let resolver = VariantResolver::new(&engine, generator, 1234, SCALE_SMALL_VALUE);
            let mut output = InstancedOutput::new(ObjectRef::mesh("/Game/A"), ts(n), (0..n).collect());
            for _ in 0..extra {
                output.add_variation(ObjectRef::mesh("/Game/B"), Transform::IDENTITY);
            }
            let realized = resolver.realize(&mut output, 0);

            let mut seen: Vec<usize> = realized.iter().flat_map(|v| v.positions.iter().copied()).collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..n).collect::<Vec<_>>());
            prop_assert!(realized.iter().all(|v| !v.transforms.is_empty()));
            prop_assert!(realized.iter().all(|v| v.variation_index < output.variation_count()));
        }
    }
}
