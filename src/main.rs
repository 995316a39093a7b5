use bevy::log::LogPlugin;
use bevy::prelude::*;
use std::sync::Arc;

use instancer_bridge::instancer::attributes::AttributeOwner;
use instancer_bridge::instancer::core::{
    GeometryPartDescriptor, InstancerKind, ObjectRef, PartType, TranslatedMeshes, ATTR_INSTANCE,
};
use instancer_bridge::instancer::memory::{MemoryEngine, MemoryPart};
use instancer_bridge::instancer::{CookSession, InstancerBridgePlugin, InstancerCooked, InstancerOutputs, PendingCook, PendingCooks};

// Headless demo: cook one scatter twice and log what changed.
fn main() {
    App::new()
        .add_plugins((MinimalPlugins, AssetPlugin::default(), LogPlugin::default()))
        .add_plugins(InstancerBridgePlugin)
        .add_systems(Startup, queue_demo_cook)
        .add_systems(Update, report_cooks)
        .run();
}

fn demo_part() -> GeometryPartDescriptor {
    GeometryPartDescriptor::new(1, 0, 0, "rock_scatter", PartType::Instancer(InstancerKind::AttributeInstancer))
}

fn demo_engine() -> MemoryEngine {
    let paths: Vec<&str> = (0..24)
        .map(|i| match i % 3 {
            0 => "/Game/Rocks/Boulder",
            1 => "/Game/Rocks/Pebble",
            _ => "/Game/Rocks/Missing",
        })
        .collect();
    let transforms = (0..paths.len())
        .map(|i| Transform::from_xyz((i % 6) as f32 * 4.0, 0.0, (i / 6) as f32 * 4.0))
        .collect();

    MemoryEngine::default()
        .with_object(ObjectRef::mesh("/Game/Rocks/Boulder"))
        .with_object(ObjectRef::mesh("/Game/Rocks/Pebble"))
        .with_object(ObjectRef::mesh("/Engine/BasicShapes/Cube"))
        .with_part(
            &demo_part(),
            MemoryPart::default()
                .with_transforms(transforms)
                .with_strings(ATTR_INSTANCE, AttributeOwner::Point, &paths),
        )
}

fn demo_cook(root: Entity) -> PendingCook {
    let engine = Arc::new(demo_engine());
    PendingCook {
        output: "demo".to_string(),
        root: Some(root),
        parts: vec![demo_part()],
        session: CookSession { reader: engine.clone(), resolver: engine, meshes: TranslatedMeshes::default() },
    }
}

fn queue_demo_cook(mut commands: Commands, mut queue: ResMut<PendingCooks>) {
    let root = commands.spawn((Transform::IDENTITY, Visibility::Visible, Name::new("Demo Output"))).id();
    queue.push(demo_cook(root));
}

/// Log each cook. Requeue once so the second report shows pure reuse, then exit.
fn report_cooks(
    mut cooked: EventReader<InstancerCooked>,
    mut queue: ResMut<PendingCooks>,
    outputs: Res<InstancerOutputs>,
    mut cooks_seen: Local<u32>,
    mut exit: EventWriter<AppExit>,
) {
    for ev in cooked.read() {
        *cooks_seen += 1;
        info!("Demo: cook #{} of '{}': {:?}", *cooks_seen, ev.output, ev.report);

        match *cooks_seen {
            1 => {
                if let Some(root) = outputs.by_name.get(&ev.output).and_then(|o| o.root) {
                    queue.push(demo_cook(root));
                }
            }
            _ => {
                info!("Demo: totals {:?}", outputs.totals);
                exit.write(AppExit::Success);
            }
        }
    }
}
