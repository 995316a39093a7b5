//! Instancer plugin wiring (glue).
//! - Settings asset/loader
//! - Foliage aggregates shared by every output
//! - Pending cook queue + exclusive cook system
//! - Re-realization of user-edited variations

use bevy::prelude::*;
use std::collections::HashMap;

use super::context::CookContext;
use super::output::InstancerOutput;
use super::queue::{CookSession, PendingCooks};
use super::reconcile::ReconcileStats;
use super::scene::{BevySceneGraph, FoliageAggregates};
use super::settings::{InstancerSettings, InstancerSettingsAssetPlugin};
use super::translator::{cook_instancer_output, update_changed_instanced_output, InstancerCookReport};

/// Where the settings asset lives. `None` runs with defaults.
#[derive(Resource, Clone)]
pub struct InstancerBridgeConfig {
    pub settings_path: Option<String>,
}
impl Default for InstancerBridgeConfig {
    fn default() -> Self {
        Self { settings_path: Some("instancer/default.instancer.ron".to_string()) }
    }
}

/// Handle to the loaded InstancerSettings asset.
#[derive(Resource, Default)]
pub struct InstancerSettingsHandle(pub Handle<InstancerSettings>);

/// Every output cooked so far, by name, with the session it was last cooked with.
#[derive(Resource, Default)]
pub struct InstancerOutputs {
    pub by_name: HashMap<String, InstancerOutput>,
    pub sessions: HashMap<String, CookSession>,
    /// Node churn summed over every cook and edit.
    pub totals: ReconcileStats,
}

/// Fired after each cook.
#[derive(Event, Clone, Debug)]
pub struct InstancerCooked {
    pub output: String,
    pub report: InstancerCookReport,
}

pub struct InstancerBridgePlugin;
impl Plugin for InstancerBridgePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(InstancerSettingsAssetPlugin)
            .init_resource::<InstancerBridgeConfig>()
            .init_resource::<InstancerSettingsHandle>()
            .init_resource::<FoliageAggregates>()
            .init_resource::<PendingCooks>()
            .init_resource::<InstancerOutputs>()
            .add_event::<InstancerCooked>()
            .add_systems(Startup, load_settings)
            .add_systems(Update, monitor_settings_ready)
            .add_systems(Update, (run_pending_cooks, apply_variation_edits).chain());
    }
}

/// Startup: request loading the settings asset, store handle.
fn load_settings(
    mut handle_res: ResMut<InstancerSettingsHandle>,
    config: Res<InstancerBridgeConfig>,
    assets: Res<AssetServer>,
) {
    if handle_res.0.is_strong() { return; }
    let Some(path) = config.settings_path.as_deref() else {
        info!("Instancer: no settings asset configured, using defaults");
        return;
    };
    handle_res.0 = assets.load(path);
    info!("Instancer: loading settings from '{}'", path);
}

/// Update: log once when the settings become available.
fn monitor_settings_ready(
    handle_res: Res<InstancerSettingsHandle>,
    settings: Res<Assets<InstancerSettings>>,
    mut logged: Local<bool>,
) {
    if *logged { return; }
    if let Some(s) = settings.get(&handle_res.0) {
        *logged = true;
        info!(
            "Instancer: settings ready (placeholder={}, generator={:?}, seed={})",
            s.show_default_placeholder, s.variation_generator, s.variation_seed
        );
    }
}

/// Loaded settings, or defaults while the asset is missing.
pub fn current_settings(world: &World) -> InstancerSettings {
    let Some(handle) = world.get_resource::<InstancerSettingsHandle>() else {
        return InstancerSettings::default();
    };
    world
        .get_resource::<Assets<InstancerSettings>>()
        .and_then(|assets| assets.get(&handle.0))
        .cloned()
        .unwrap_or_default()
}

/// Exclusive: drain the queue, one cook per request, against the Bevy scene graph.
pub fn run_pending_cooks(world: &mut World) {
    let items = match world.get_resource_mut::<PendingCooks>() {
        Some(mut queue) if !queue.items.is_empty() => std::mem::take(&mut queue.items),
        _ => return,
    };
    let settings = current_settings(world);
    world.init_resource::<InstancerOutputs>();

    world.resource_scope(|world, mut outputs: Mut<InstancerOutputs>| {
        for cook in items {
            let output = outputs
                .by_name
                .entry(cook.output.clone())
                .or_insert_with(|| InstancerOutput::new(cook.root));
            if cook.root.is_some() {
                output.root = cook.root;
            }

            let report = {
                let session = &cook.session;
                let ctx = CookContext::new(session.reader.as_ref(), session.resolver.as_ref(), &session.meshes, &settings);
                let mut scene = BevySceneGraph::new(world, output.root);
                cook_instancer_output(output, &cook.parts, &ctx, &mut scene)
            };

            outputs.totals.merge(&report.nodes);
            world.send_event(InstancerCooked { output: cook.output.clone(), report });
            outputs.sessions.insert(cook.output, cook.session);
        }
    });
}

/// Exclusive: re-realize instanced outputs whose variations were edited since the last cook.
pub fn apply_variation_edits(world: &mut World) {
    if !world.contains_resource::<InstancerOutputs>() {
        return;
    }
    let settings = current_settings(world);

    world.resource_scope(|world, mut outputs: Mut<InstancerOutputs>| {
        let outputs = &mut *outputs;
        for (name, output) in outputs.by_name.iter_mut() {
            let changed = output.changed_instanced_outputs();
            if changed.is_empty() {
                continue;
            }
            let Some(session) = outputs.sessions.get(name) else {
                warn!("Instancer: '{}' has edits but was never cooked through the queue", name);
                continue;
            };
            let ctx = CookContext::new(session.reader.as_ref(), session.resolver.as_ref(), &session.meshes, &settings);
            let mut scene = BevySceneGraph::new(world, output.root);
            for id in changed {
                match update_changed_instanced_output(output, &id, &ctx, &mut scene) {
                    Ok(stats) => outputs.totals.merge(&stats),
                    Err(e) => {
                        warn!("Instancer: edit of {} on '{}' not applied: {}", id, name, e);
                        if let Some(o) = output.instanced_output_mut(&id) {
                            o.mark_changed(false);
                        }
                    }
                }
            }
        }
    });
}
