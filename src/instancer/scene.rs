// src/instancer/scene.rs
//! Bevy-backed scene graph: output objects become entities with explicit components.

use bevy::prelude::*;
use std::collections::HashMap;

use super::core::{ObjectRef, OutputObjectIdentifier};
use super::part_data::ResolvedProperty;
use super::reconcile::{NodeKind, NodeRequest, SceneError, SceneGraph};

/// One realized output object.
#[derive(Component, Clone, Debug)]
pub struct InstancerNode {
    pub identifier: OutputObjectIdentifier,
    pub kind: NodeKind,
    pub object: ObjectRef,
    pub material: Option<String>,
}

/// Instance transforms of an array-instanced node (local to the node).
#[derive(Component, Clone, Debug, Default)]
pub struct InstanceTransforms {
    pub instances: Vec<Transform>,
}

/// Per-instance float payload, `[instance][channel]`.
#[derive(Component, Clone, Debug, Default)]
pub struct InstanceCustomData {
    pub channels: usize,
    pub values: Vec<f32>,
}

/// Property overrides forwarded from `unreal_uproperty_*` attributes.
#[derive(Component, Clone, Debug, Default)]
pub struct PropertyOverrides(pub Vec<ResolvedProperty>);

/// Children spawned for per-instance kinds.
#[derive(Component, Clone, Debug, Default)]
pub struct InstanceChildren(pub Vec<Entity>);

/// Child of a split-per-instance or actor-per-instance node.
#[derive(Component, Clone, Copy, Debug)]
pub struct InstanceIndex(pub usize);

/// Key of one producer's contribution to a foliage aggregate.
pub type FoliageContributor = (Option<Entity>, OutputObjectIdentifier);

/// Shared per-object foliage container fed by any number of producers.
#[derive(Component, Clone, Debug)]
pub struct FoliageAggregate {
    pub object: ObjectRef,
    pub contributions: HashMap<FoliageContributor, Vec<Transform>>,
}

impl FoliageAggregate {
    pub fn instance_count(&self) -> usize {
        self.contributions.values().map(Vec::len).sum()
    }
}

/// Object path → aggregate entity.
#[derive(Resource, Default, Debug)]
pub struct FoliageAggregates {
    pub by_object: HashMap<String, Entity>,
}

/// [`SceneGraph`] over a Bevy world. New nodes are parented to `root` when given.
pub struct BevySceneGraph<'w> {
    world: &'w mut World,
    root: Option<Entity>,
}

impl<'w> BevySceneGraph<'w> {
    pub fn new(world: &'w mut World, root: Option<Entity>) -> Self {
        Self { world, root }
    }

    fn node_of_kind(&self, hint: Option<Entity>, kind: NodeKind) -> Option<Entity> {
        let h = hint?;
        let node = self.world.get::<InstancerNode>(h)?;
        (node.kind == kind).then_some(h)
    }

    fn visibility(hidden: Option<bool>) -> Visibility {
        match hidden {
            Some(true) => Visibility::Hidden,
            Some(false) => Visibility::Visible,
            None => Visibility::Inherited,
        }
    }

    fn spawn_node(&mut self, request: &NodeRequest<'_>) -> Entity {
        let name = Name::new(format!("{} {}", request.kind.label(), request.identifier));
        let mut e = self.world.spawn((
            request.part_transform,
            GlobalTransform::IDENTITY,
            Visibility::Visible,
            name,
        ));
        if let Some(root) = self.root {
            e.insert(ChildOf(root));
        }
        e.id()
    }

    fn write_node(&mut self, node: Entity, request: &NodeRequest<'_>) {
        let previous_children = self.world.get::<InstanceChildren>(node).map(|c| c.0.clone()).unwrap_or_default();
        for child in previous_children {
            if self.world.get_entity(child).is_ok() {
                self.world.despawn(child);
            }
        }

        let children = if request.kind.has_instance_children() {
            request
                .transforms
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    self.world
                        .spawn((*t, GlobalTransform::IDENTITY, Visibility::Inherited, InstanceIndex(i), ChildOf(node)))
                        .id()
                })
                .collect()
        } else {
            Vec::new()
        };

        let single = request.kind == NodeKind::SingleStatic;
        let transform = match (single, request.transforms.first()) {
            (true, Some(t)) => request.part_transform * *t,
            _ => request.part_transform,
        };
        let instances = if single || request.kind.has_instance_children() {
            Vec::new()
        } else {
            request.transforms.to_vec()
        };

        let mut e = self.world.entity_mut(node);
        e.insert((
            InstancerNode {
                identifier: request.identifier.clone(),
                kind: request.kind,
                object: request.object.clone(),
                material: request.material.map(str::to_string),
            },
            transform,
            InstanceTransforms { instances },
            PropertyOverrides(request.properties.to_vec()),
            InstanceChildren(children),
            Self::visibility(request.hidden),
        ));
        match request.custom_data {
            Some(cd) => {
                e.insert(InstanceCustomData { channels: cd.channel_count(), values: cd.values().to_vec() });
            }
            None => {
                e.remove::<InstanceCustomData>();
            }
        }
    }

    fn add_to_aggregate(&mut self, request: &NodeRequest<'_>) -> Entity {
        let known = self
            .world
            .get_resource_or_insert_with(FoliageAggregates::default)
            .by_object
            .get(&request.object.path)
            .copied();
        let existing = known.filter(|e| self.world.get::<FoliageAggregate>(*e).is_some());

        let aggregate = match existing {
            Some(e) => e,
            None => {
                let e = self
                    .world
                    .spawn((
                        FoliageAggregate { object: request.object.clone(), contributions: HashMap::new() },
                        Transform::IDENTITY,
                        GlobalTransform::IDENTITY,
                        Visibility::Visible,
                        Name::new(format!("Foliage {}", request.object.path)),
                    ))
                    .id();
                self.world
                    .resource_mut::<FoliageAggregates>()
                    .by_object
                    .insert(request.object.path.clone(), e);
                debug!("Instancer: new foliage aggregate for '{}'.", request.object.path);
                e
            }
        };

        let placed: Vec<Transform> = request.transforms.iter().map(|t| request.part_transform * *t).collect();
        if let Some(mut agg) = self.world.get_mut::<FoliageAggregate>(aggregate) {
            agg.contributions.insert((self.root, request.identifier.clone()), placed);
        }
        aggregate
    }
}

impl SceneGraph for BevySceneGraph<'_> {
    fn create_or_reuse_node(&mut self, request: &NodeRequest<'_>, hint: Option<Entity>) -> Result<Entity, SceneError> {
        if request.transforms.is_empty() {
            return Err(SceneError::NoTransforms);
        }
        if request.kind == NodeKind::Foliage {
            return Ok(self.add_to_aggregate(request));
        }

        let node = match self.node_of_kind(hint, request.kind) {
            Some(node) => node,
            None => self.spawn_node(request),
        };
        self.write_node(node, request);
        Ok(node)
    }

    fn destroy_node(&mut self, node: Entity) {
        if self.world.get_entity(node).is_ok() {
            self.world.despawn(node);
        }
    }

    fn is_shared_aggregate(&self, node: Entity) -> bool {
        self.world.get::<FoliageAggregate>(node).is_some()
    }

    fn detach_from_aggregate(&mut self, node: Entity, identifier: &OutputObjectIdentifier) {
        if let Some(mut agg) = self.world.get_mut::<FoliageAggregate>(node) {
            agg.contributions.remove(&(self.root, identifier.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instancer::core::{GeometryPartDescriptor, InstancerKind, ObjectKind, PartType};
    use crate::instancer::custom_data::CustomData;

    fn id(split: &str) -> OutputObjectIdentifier {
        let part = GeometryPartDescriptor::new(1, 0, 0, "p", PartType::Instancer(InstancerKind::AttributeInstancer));
        OutputObjectIdentifier::for_part(&part, split)
    }

    fn request<'a>(
        identifier: &'a OutputObjectIdentifier,
        object: &'a ObjectRef,
        transforms: &'a [Transform],
        kind: NodeKind,
        custom_data: Option<&'a CustomData>,
    ) -> NodeRequest<'a> {
        NodeRequest {
            identifier,
            kind,
            object,
            transforms,
            part_transform: Transform::IDENTITY,
            material: Some("/Game/M"),
            properties: &[],
            custom_data,
            hidden: Some(false),
        }
    }

    fn ts(n: usize) -> Vec<Transform> {
        (0..n).map(|i| Transform::from_xyz(i as f32, 0.0, 0.0)).collect()
    }

    #[test]
    fn array_node_is_updated_in_place() {
        let mut world = World::new();
        let root = world.spawn_empty().id();
        let object = ObjectRef::mesh("/Game/A");
        let identifier = id("0_0");
        let data = CustomData::new(1, vec![0.5, 1.5]).expect("rows");

        let mut scene = BevySceneGraph::new(&mut world, Some(root));
        let t2 = ts(2);
        let first = scene
            .create_or_reuse_node(&request(&identifier, &object, &t2, NodeKind::ArrayInstanced, Some(&data)), None)
            .expect("node");
        let t3 = ts(3);
        let second = scene
            .create_or_reuse_node(&request(&identifier, &object, &t3, NodeKind::ArrayInstanced, None), Some(first))
            .expect("node");
        assert_eq!(first, second);

        assert_eq!(world.get::<InstanceTransforms>(first).map(|t| t.instances.len()), Some(3));
        assert!(world.get::<InstanceCustomData>(first).is_none());
        assert_eq!(world.get::<InstancerNode>(first).and_then(|n| n.material.clone()).as_deref(), Some("/Game/M"));
        assert_eq!(world.get::<ChildOf>(first).map(|c| c.parent()), Some(root));
    }

    #[test]
    fn kind_change_spawns_a_new_node_with_children() {
        let mut world = World::new();
        let object = ObjectRef::new("/Script/Lamp", ObjectKind::Class);
        let identifier = id("0_0");
        let t3 = ts(3);

        let mut scene = BevySceneGraph::new(&mut world, None);
        let array = scene
            .create_or_reuse_node(&request(&identifier, &object, &t3, NodeKind::ArrayInstanced, None), None)
            .expect("node");
        let actors = scene
            .create_or_reuse_node(&request(&identifier, &object, &t3, NodeKind::ActorPerInstance, None), Some(array))
            .expect("node");
        assert_ne!(array, actors);

        let children = world.get::<InstanceChildren>(actors).map(|c| c.0.clone()).unwrap_or_default();
        assert_eq!(children.len(), 3);
        assert_eq!(world.get::<InstanceIndex>(children[2]).map(|i| i.0), Some(2));

        let mut scene = BevySceneGraph::new(&mut world, None);
        scene.destroy_node(actors);
        assert!(world.get_entity(actors).is_err());
        assert!(world.get_entity(children[0]).is_err());
    }

    #[test]
    fn foliage_is_shared_and_detached_per_contributor() {
        let mut world = World::new();
        let owner_a = world.spawn_empty().id();
        let owner_b = world.spawn_empty().id();
        let object = ObjectRef::new("/Game/Grass", ObjectKind::Mesh { lod_count: 1, foliage_type: true });
        let identifier = id("0_0");
        let t2 = ts(2);

        let a = BevySceneGraph::new(&mut world, Some(owner_a))
            .create_or_reuse_node(&request(&identifier, &object, &t2, NodeKind::Foliage, None), None)
            .expect("node");
        let b = BevySceneGraph::new(&mut world, Some(owner_b))
            .create_or_reuse_node(&request(&identifier, &object, &t2, NodeKind::Foliage, None), None)
            .expect("node");
        assert_eq!(a, b);
        assert_eq!(world.get::<FoliageAggregate>(a).map(|f| f.instance_count()), Some(4));

        let mut scene = BevySceneGraph::new(&mut world, Some(owner_a));
        assert!(scene.is_shared_aggregate(a));
        scene.detach_from_aggregate(a, &identifier);
        assert_eq!(world.get::<FoliageAggregate>(a).map(|f| f.instance_count()), Some(2));
    }

    #[test]
    fn empty_transforms_are_rejected() {
        let mut world = World::new();
        let object = ObjectRef::mesh("/Game/A");
        let identifier = id("0_0");
        let mut scene = BevySceneGraph::new(&mut world, None);
        let err = scene
            .create_or_reuse_node(&request(&identifier, &object, &[], NodeKind::SingleStatic, None), None)
            .unwrap_err();
        assert_eq!(err, SceneError::NoTransforms);
    }
}
