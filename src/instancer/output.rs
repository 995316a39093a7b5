// src/instancer/output.rs
//! The owning output: sole owner of one producer's instanced outputs and output objects.

use bevy::prelude::*;
use std::collections::HashMap;

use super::core::{GeometryPartDescriptor, OutputObjectIdentifier, RebindPlan};
use super::reconcile::{OutputObject, SceneGraph};
use super::variation::InstancedOutput;

/// State kept between cooks for one producer.
#[derive(Clone, Debug, Default)]
pub struct InstancerOutput {
    pub(crate) parts: Vec<GeometryPartDescriptor>,
    pub(crate) instanced_outputs: HashMap<OutputObjectIdentifier, InstancedOutput>,
    pub(crate) output_objects: HashMap<OutputObjectIdentifier, OutputObject>,
    /// Scene node new nodes are parented to.
    pub root: Option<Entity>,
}

impl InstancerOutput {
    pub fn new(root: Option<Entity>) -> Self {
        Self { root, ..Default::default() }
    }

    /// Instancer parts of the latest cook.
    pub fn parts(&self) -> &[GeometryPartDescriptor] {
        &self.parts
    }

    pub fn instanced_outputs(&self) -> &HashMap<OutputObjectIdentifier, InstancedOutput> {
        &self.instanced_outputs
    }

    pub fn output_objects(&self) -> &HashMap<OutputObjectIdentifier, OutputObject> {
        &self.output_objects
    }

    /// Mutable access for user variation edits.
    pub fn instanced_output_mut(&mut self, id: &OutputObjectIdentifier) -> Option<&mut InstancedOutput> {
        self.instanced_outputs.get_mut(id)
    }

    /// Identifiers of instanced outputs edited since their last realization.
    pub fn changed_instanced_outputs(&self) -> Vec<OutputObjectIdentifier> {
        self.instanced_outputs
            .iter()
            .filter(|(_, o)| o.is_changed())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Mark every stored identifier as restored: numeric ids are no longer trusted.
    pub fn mark_loaded(&mut self) {
        fn mark<V>(map: HashMap<OutputObjectIdentifier, V>) -> HashMap<OutputObjectIdentifier, V> {
            map.into_iter()
                .map(|(mut k, v)| {
                    k.loaded = true;
                    (k, v)
                })
                .collect()
        }
        self.instanced_outputs = mark(std::mem::take(&mut self.instanced_outputs));
        self.output_objects = mark(std::mem::take(&mut self.output_objects));
    }

    /// Patch loaded identifiers onto this cook's parts. Returns the number re-keyed.
    ///
    /// Entries that could not be kept release their nodes right away; entries left
    /// loaded are collected by the cook like any other stale entry.
    pub(crate) fn rebind_loaded_identifiers(&mut self, parts: &[GeometryPartDescriptor], scene: &mut dyn SceneGraph) -> usize {
        let plan = RebindPlan::new(parts, self.instanced_outputs.keys().chain(self.output_objects.keys()));
        let states = plan.apply(&mut self.instanced_outputs);
        let objects = plan.apply(&mut self.output_objects);

        for (id, _) in &states.orphaned {
            warn!("Instancer: restored variation state {} collides with a current one; dropped.", id);
        }
        for (id, obj) in objects.orphaned {
            warn!("Instancer: restored output {} collides with a current one; its nodes are released.", id);
            release_nodes(scene, &id, &obj);
        }
        states.patched + objects.patched
    }

    pub(crate) fn mark_all_stale(&mut self) {
        for out in self.instanced_outputs.values_mut() {
            out.stale = true;
        }
    }

    /// Drop instanced outputs nobody refreshed this cook.
    pub(crate) fn collect_stale(&mut self) -> usize {
        let before = self.instanced_outputs.len();
        self.instanced_outputs.retain(|_, o| !o.stale);
        before - self.instanced_outputs.len()
    }

    /// Destroy every node this output owns and forget all state.
    pub fn clear(&mut self, scene: &mut dyn SceneGraph) {
        for (id, obj) in self.output_objects.drain() {
            release_nodes(scene, &id, &obj);
        }
        self.instanced_outputs.clear();
        self.parts.clear();
    }
}

fn release_nodes(scene: &mut dyn SceneGraph, id: &OutputObjectIdentifier, obj: &OutputObject) {
    for node in obj.node.into_iter().chain(obj.proxy_node) {
        if scene.is_shared_aggregate(node) {
            scene.detach_from_aggregate(node, id);
        } else {
            scene.destroy_node(node);
        }
    }
}
