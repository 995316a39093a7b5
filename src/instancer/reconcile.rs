// src/instancer/reconcile.rs
//! Diff this cook's realized outputs against the previous cook's and drive the scene graph.

use bevy::prelude::*;
use std::collections::HashMap;

use super::core::{ObjectKind, ObjectRef, OutputObjectIdentifier};
use super::custom_data::CustomData;
use super::part_data::{CachedMetadata, InstancerFlags, ResolvedProperty};

/// Kind of scene node realizing one output object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// One plain mesh node.
    SingleStatic,
    ArrayInstanced,
    /// Array instancing with per-cluster culling/LOD.
    HierarchicalInstanced,
    /// One mesh node per instance.
    SplitPerInstance,
    /// One spawned actor per instance.
    ActorPerInstance,
    /// Instances added to a shared foliage aggregate.
    Foliage,
}

impl NodeKind {
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::SingleStatic => "Static",
            NodeKind::ArrayInstanced => "Instanced",
            NodeKind::HierarchicalInstanced => "HierarchicalInstanced",
            NodeKind::SplitPerInstance => "SplitInstances",
            NodeKind::ActorPerInstance => "Actors",
            NodeKind::Foliage => "Foliage",
        }
    }

    /// Kinds whose node is a parent of one child per instance.
    #[inline]
    pub fn has_instance_children(self) -> bool {
        matches!(self, NodeKind::SplitPerInstance | NodeKind::ActorPerInstance)
    }
}

/// Pick the node kind for `count` instances of `object`. Second value: bind as proxy node.
pub fn select_node_kind(
    object: &ObjectRef,
    count: usize,
    flags: &InstancerFlags,
    lod_threshold_for_hierarchical: u32,
) -> Result<(NodeKind, bool), SceneError> {
    match object.kind {
        ObjectKind::Mesh { foliage_type: true, .. } => Ok((NodeKind::Foliage, false)),
        ObjectKind::Mesh { lod_count, .. } => {
            let must_instance = count > 1 || flags.force_instancer;
            let kind = if flags.foliage {
                NodeKind::Foliage
            } else if flags.split_instances {
                NodeKind::SplitPerInstance
            } else if flags.force_hierarchical || (must_instance && lod_count > lod_threshold_for_hierarchical) {
                NodeKind::HierarchicalInstanced
            } else if must_instance {
                NodeKind::ArrayInstanced
            } else {
                NodeKind::SingleStatic
            };
            Ok((kind, false))
        }
        ObjectKind::ProxyMesh if count == 1 => Ok((NodeKind::SingleStatic, true)),
        ObjectKind::ProxyMesh => Err(SceneError::ProxyInstancing { count }),
        ObjectKind::Class | ObjectKind::Other => Ok((NodeKind::ActorPerInstance, false)),
    }
}

/// Everything the scene graph needs to build or update one node.
#[derive(Clone, Debug)]
pub struct NodeRequest<'a> {
    pub identifier: &'a OutputObjectIdentifier,
    pub kind: NodeKind,
    pub object: &'a ObjectRef,
    pub transforms: &'a [Transform],
    /// Transform of the instancer part itself.
    pub part_transform: Transform,
    pub material: Option<&'a str>,
    pub properties: &'a [ResolvedProperty],
    pub custom_data: Option<&'a CustomData>,
    /// `None` leaves visibility to the properties.
    pub hidden: Option<bool>,
}

/// Host scene graph primitives.
pub trait SceneGraph {
    /// Update `hint` in place when it is still a node of `request.kind`, otherwise create a new node.
    fn create_or_reuse_node(&mut self, request: &NodeRequest<'_>, hint: Option<Entity>) -> Result<Entity, SceneError>;

    fn destroy_node(&mut self, node: Entity);

    /// The node is a shared foliage aggregate that other producers may also feed.
    fn is_shared_aggregate(&self, node: Entity) -> bool;

    /// Remove only the instances `identifier` contributed to an aggregate.
    fn detach_from_aggregate(&mut self, node: Entity, identifier: &OutputObjectIdentifier);
}

/// Current binding of an identifier to scene nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputObject {
    pub node: Option<Entity>,
    pub proxy_node: Option<Entity>,
    pub object: ObjectRef,
    pub kind: NodeKind,
    pub cached: CachedMetadata,
}

impl OutputObject {
    fn nodes(&self) -> impl Iterator<Item = Entity> + '_ {
        self.node.into_iter().chain(self.proxy_node)
    }
}

/// Node churn of one reconciliation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: usize,
    pub reused: usize,
    pub destroyed: usize,
    pub detached: usize,
    pub failed: usize,
}

impl ReconcileStats {
    pub fn merge(&mut self, other: &ReconcileStats) {
        self.created += other.created;
        self.reused += other.reused;
        self.destroyed += other.destroyed;
        self.detached += other.detached;
        self.failed += other.failed;
    }
}

/// One pass from the previous output-object map to the next.
pub struct Reconciler {
    previous: HashMap<OutputObjectIdentifier, OutputObject>,
    next: HashMap<OutputObjectIdentifier, OutputObject>,
    stats: ReconcileStats,
}

impl Reconciler {
    pub fn begin(previous: HashMap<OutputObjectIdentifier, OutputObject>) -> Self {
        Self { previous, next: HashMap::new(), stats: ReconcileStats::default() }
    }

    /// Realize one output object, reusing the previous node for the same identifier if possible.
    /// A failure is logged and counted; the previous node then goes away in [`Reconciler::finish`].
    pub fn realize(
        &mut self,
        scene: &mut dyn SceneGraph,
        request: &NodeRequest<'_>,
        as_proxy: bool,
        cached: CachedMetadata,
    ) -> Option<&mut OutputObject> {
        let hint = self
            .previous
            .get(request.identifier)
            .and_then(|old| if as_proxy { old.proxy_node } else { old.node });

        let node = match scene.create_or_reuse_node(request, hint) {
            Ok(node) => node,
            Err(e) => {
                self.skip(request.identifier, &e);
                return None;
            }
        };
        if hint == Some(node) {
            self.stats.reused += 1;
        } else {
            self.stats.created += 1;
        }

        let entry = OutputObject {
            node: (!as_proxy).then_some(node),
            proxy_node: as_proxy.then_some(node),
            object: request.object.clone(),
            kind: request.kind,
            cached,
        };
        if let Some(replaced) = self.next.insert(request.identifier.clone(), entry) {
            // Same identifier realized twice: the earlier node is no longer referenced.
            let nodes: Vec<Entity> = replaced.nodes().filter(|n| *n != node).collect();
            for n in nodes {
                self.release(scene, n, request.identifier);
            }
        }
        self.next.get_mut(request.identifier)
    }

    /// Record an output object that could not be realized this cook.
    pub fn skip(&mut self, identifier: &OutputObjectIdentifier, err: &SceneError) {
        error!("Instancer: could not realize {}: {}", identifier, err);
        self.stats.failed += 1;
    }

    /// Destroy (or detach) everything not carried over and hand back the new map.
    pub fn finish(mut self, scene: &mut dyn SceneGraph) -> (HashMap<OutputObjectIdentifier, OutputObject>, ReconcileStats) {
        let kept: Vec<OutputObjectIdentifier> = self
            .next
            .iter()
            .filter(|(id, new)| self.previous.get(*id).is_some_and(|old| same_nodes(old, new)))
            .map(|(id, _)| id.clone())
            .collect();
        for id in kept {
            self.previous.remove(&id);
        }

        let stale = std::mem::take(&mut self.previous);
        for (id, old) in stale {
            let still_used: Vec<Entity> = self.next.get(&id).map(|n| n.nodes().collect()).unwrap_or_default();
            for node in old.nodes() {
                if !still_used.contains(&node) {
                    self.release(scene, node, &id);
                }
            }
        }
        (self.next, self.stats)
    }

    fn release(&mut self, scene: &mut dyn SceneGraph, node: Entity, id: &OutputObjectIdentifier) {
        if scene.is_shared_aggregate(node) {
            scene.detach_from_aggregate(node, id);
            self.stats.detached += 1;
        } else {
            scene.destroy_node(node);
            self.stats.destroyed += 1;
        }
    }
}

fn same_nodes(old: &OutputObject, new: &OutputObject) -> bool {
    old.node == new.node && old.proxy_node == new.proxy_node
}

// ---------- Errors ----------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    #[error("a proxy mesh cannot be instanced {count} times")]
    ProxyInstancing { count: usize },
    #[error("no transforms to realize")]
    NoTransforms,
    #[error("scene graph rejected the node: {0}")]
    Rejected(String),
}
