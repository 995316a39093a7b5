// src/instancer/translator.rs
//! Cook driver: part by part, normalize → resolve variations → reconcile nodes.

use bevy::prelude::*;
use std::collections::HashMap;

use super::context::CookContext;
use super::core::{GeometryPartDescriptor, OutputObjectIdentifier};
use super::normalize::NormalizeError;
use super::output::InstancerOutput;
use super::part_data::InstancerPartData;
use super::reconcile::{select_node_kind, NodeRequest, ReconcileStats, Reconciler, SceneGraph};
use super::variation::{VariantResolver, VariationInstances};

/// What one cook did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstancerCookReport {
    pub parts_processed: usize,
    pub parts_skipped: usize,
    pub identifiers_rebound: usize,
    pub instanced_outputs_collected: usize,
    pub nodes: ReconcileStats,
}

/// Cook every instancer part in `parts` into `output`.
///
/// Non-instancer parts are ignored. Parts that fail to normalize produce nothing this
/// cook; their previous nodes are destroyed and their variation state collected.
pub fn cook_instancer_output(
    output: &mut InstancerOutput,
    parts: &[GeometryPartDescriptor],
    ctx: &CookContext<'_>,
    scene: &mut dyn SceneGraph,
) -> InstancerCookReport {
    let instancer_parts: Vec<GeometryPartDescriptor> =
        parts.iter().filter(|p| p.instancer_kind().is_some()).cloned().collect();

    let mut report = InstancerCookReport {
        identifiers_rebound: output.rebind_loaded_identifiers(&instancer_parts, scene),
        ..Default::default()
    };
    output.mark_all_stale();

    let resolver = VariantResolver::from_context(ctx);
    let mut reconciler = Reconciler::begin(std::mem::take(&mut output.output_objects));

    for part in &instancer_parts {
        let data = match InstancerPartData::populate(part, ctx) {
            Ok(data) => data,
            Err(e) => {
                warn!("Instancer: part '{}' produces no instances this cook: {}", part.part_name, e);
                report.parts_skipped += 1;
                continue;
            }
        };

        let base = OutputObjectIdentifier::for_part(part, "");
        let variations = resolver.update(&mut output.instanced_outputs, &base, &data.instancer.tuples);
        debug!(
            "Instancer: part '{}': {} object(s), {} variation subset(s).",
            part.part_name,
            data.instancer.tuples.len(),
            variations.len()
        );
        realize_variations(&mut reconciler, scene, ctx, &data, &base, &variations);
        report.parts_processed += 1;
    }

    let (next, stats) = reconciler.finish(scene);
    output.output_objects = next;
    output.parts = instancer_parts;
    report.instanced_outputs_collected = output.collect_stale();
    report.nodes = stats;

    info!(
        "Instancer: cooked {} part(s) ({} skipped); nodes +{} ~{} -{} detached {} failed {}; {} stale output(s) collected.",
        report.parts_processed,
        report.parts_skipped,
        stats.created,
        stats.reused,
        stats.destroyed,
        stats.detached,
        stats.failed,
        report.instanced_outputs_collected
    );
    report
}

/// Re-realize one edited instanced output without a new cook.
///
/// Only output objects of that original object (`"<orig>_*"`) are reconciled.
pub fn update_changed_instanced_output(
    output: &mut InstancerOutput,
    identifier: &OutputObjectIdentifier,
    ctx: &CookContext<'_>,
    scene: &mut dyn SceneGraph,
) -> Result<ReconcileStats, UpdateError> {
    let part = output
        .parts
        .iter()
        .find(|p| identifier.same_ids(p))
        .cloned()
        .ok_or_else(|| UpdateError::MissingPart(identifier.to_string()))?;
    let original_index: usize = identifier
        .split_identifier
        .parse()
        .map_err(|_| UpdateError::UnknownOutput(identifier.to_string()))?;

    let data = InstancerPartData::populate(&part, ctx)?;
    let resolver = VariantResolver::from_context(ctx);
    let instanced = output
        .instanced_outputs
        .get_mut(identifier)
        .ok_or_else(|| UpdateError::UnknownOutput(identifier.to_string()))?;
    let variations = resolver.realize(instanced, original_index);

    let prefix = format!("{original_index}_");
    let owned: Vec<OutputObjectIdentifier> = output
        .output_objects
        .keys()
        .filter(|k| k.same_ids(&part) && k.split_identifier.starts_with(&prefix))
        .cloned()
        .collect();
    let previous: HashMap<_, _> = owned
        .into_iter()
        .filter_map(|k| output.output_objects.remove_entry(&k))
        .collect();

    let base = OutputObjectIdentifier::for_part(&part, "");
    let mut reconciler = Reconciler::begin(previous);
    realize_variations(&mut reconciler, scene, ctx, &data, &base, &variations);
    let (next, stats) = reconciler.finish(scene);
    output.output_objects.extend(next);

    debug!(
        "Instancer: re-realized {}: nodes +{} ~{} -{}.",
        identifier, stats.created, stats.reused, stats.destroyed
    );
    Ok(stats)
}

fn realize_variations(
    reconciler: &mut Reconciler,
    scene: &mut dyn SceneGraph,
    ctx: &CookContext<'_>,
    data: &InstancerPartData,
    base: &OutputObjectIdentifier,
    variations: &[VariationInstances],
) {
    for v in variations {
        let orig = v.original_object_index;
        let Some(tuple) = data.instancer.tuples.get(orig) else { continue };
        let identifier = base.with_split(v.split_identifier());

        let (kind, as_proxy) = match select_node_kind(
            &v.object,
            v.transforms.len(),
            &data.flags,
            ctx.settings.lod_threshold_for_hierarchical,
        ) {
            Ok(k) => k,
            Err(e) => {
                reconciler.skip(&identifier, &e);
                continue;
            }
        };

        let properties = data.properties_at(tuple.first_index());
        let custom_data = data
            .custom_data
            .get(orig)
            .and_then(Option::as_ref)
            .map(|cd| cd.select_rows(&v.positions));

        let request = NodeRequest {
            identifier: &identifier,
            kind,
            object: &v.object,
            transforms: &v.transforms,
            part_transform: data.part.transform,
            material: data.material_at(v.first_original_index()),
            properties: &properties,
            custom_data: custom_data.as_ref(),
            hidden: data.hidden_flag(v.is_placeholder),
        };
        let cached = data.cached_metadata(orig, tuple.first_index());
        reconciler.realize(scene, &request, as_proxy, cached);
    }
}

// ---------- Errors ----------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("no instanced output {0}")]
    UnknownOutput(String),
    #[error("part of {0} is not in the last cook")]
    MissingPart(String),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instancer::attributes::AttributeOwner;
    use crate::instancer::core::{InstancerKind, ObjectKind, ObjectRef, PartType, TranslatedMeshes, ATTR_INSTANCE};
    use crate::instancer::memory::{MemoryEngine, MemoryPart};
    use crate::instancer::reconcile::tests::RecordingScene;
    use crate::instancer::reconcile::NodeKind;
    use crate::instancer::settings::InstancerSettings;

    fn part() -> GeometryPartDescriptor {
        GeometryPartDescriptor::new(2, 0, 1, "scatter", PartType::Instancer(InstancerKind::AttributeInstancer))
    }

    fn engine(paths: &[&str]) -> MemoryEngine {
        let transforms = (0..paths.len()).map(|i| Transform::from_xyz(i as f32, 0.0, 0.0)).collect();
        MemoryEngine::default()
            .with_object(ObjectRef::mesh("/Game/A"))
            .with_object(ObjectRef::mesh("/Game/B"))
            .with_object(ObjectRef::mesh("/Engine/BasicShapes/Cube"))
            .with_part(
                &part(),
                MemoryPart::default()
                    .with_transforms(transforms)
                    .with_strings(ATTR_INSTANCE, AttributeOwner::Point, paths),
            )
    }

    fn cook(output: &mut InstancerOutput, engine: &MemoryEngine, scene: &mut RecordingScene) -> InstancerCookReport {
        let meshes = TranslatedMeshes::default();
        let settings = InstancerSettings::default();
        let ctx = CookContext::new(engine, engine, &meshes, &settings);
        cook_instancer_output(output, &[part()], &ctx, scene)
    }

    #[test]
    fn ten_transforms_become_one_array_node() {
        let mut output = InstancerOutput::default();
        let mut scene = RecordingScene::default();
        let report = cook(&mut output, &engine(&["/Game/A"; 10]), &mut scene);

        assert_eq!(report.parts_processed, 1);
        assert_eq!(report.nodes.created, 1);
        assert_eq!(output.output_objects().len(), 1);
        let id = OutputObjectIdentifier::for_part(&part(), "0_0");
        let obj = &output.output_objects()[&id];
        assert_eq!(obj.kind, NodeKind::ArrayInstanced);
        assert_eq!(output.instanced_outputs().len(), 1);
    }

    #[test]
    fn second_identical_cook_has_no_churn() {
        let mut output = InstancerOutput::default();
        let mut scene = RecordingScene::default();
        let engine = engine(&["/Game/A", "/Game/B", "/Game/A"]);
        cook(&mut output, &engine, &mut scene);
        let before = output.output_objects().clone();

        let report = cook(&mut output, &engine, &mut scene);
        assert_eq!(report.nodes.created, 0);
        assert_eq!(report.nodes.destroyed, 0);
        assert_eq!(report.nodes.reused, 2);
        assert_eq!(output.output_objects(), &before);
    }

    #[test]
    fn missing_asset_cooks_as_hidden_placeholder() {
        let mut output = InstancerOutput::default();
        let mut scene = RecordingScene::default();
        cook(&mut output, &engine(&["/Game/Missing", "/Game/Missing"]), &mut scene);

        let id = OutputObjectIdentifier::for_part(&part(), "0_0");
        assert_eq!(output.output_objects()[&id].object.path, "/Engine/BasicShapes/Cube");
    }

    #[test]
    fn instanced_proxy_mesh_is_skipped() {
        let mut output = InstancerOutput::default();
        let mut scene = RecordingScene::default();
        let engine = engine(&["/Game/A_proxy", "/Game/A_proxy", "/Game/A"])
            .with_object(ObjectRef::new("/Game/A_proxy", ObjectKind::ProxyMesh));
        let report = cook(&mut output, &engine, &mut scene);

        assert_eq!(report.nodes.failed, 1);
        assert_eq!(report.nodes.created, 1);
        assert!(output.output_objects().contains_key(&OutputObjectIdentifier::for_part(&part(), "1_0")));
        assert!(!output.output_objects().contains_key(&OutputObjectIdentifier::for_part(&part(), "0_0")));
    }

    #[test]
    fn vanished_objects_are_destroyed_and_collected() {
        let mut output = InstancerOutput::default();
        let mut scene = RecordingScene::default();
        cook(&mut output, &engine(&["/Game/A", "/Game/B", "/Game/A"]), &mut scene);
        assert_eq!(output.instanced_outputs().len(), 2);

        let report = cook(&mut output, &engine(&["/Game/A", "/Game/A"]), &mut scene);
        assert_eq!(report.instanced_outputs_collected, 1);
        assert_eq!(report.nodes.destroyed, 1);
        assert_eq!(output.output_objects().len(), 1);
    }

    #[test]
    fn failing_part_is_skipped_and_its_nodes_removed() {
        let mut output = InstancerOutput::default();
        let mut scene = RecordingScene::default();
        cook(&mut output, &engine(&["/Game/A", "/Game/A"]), &mut scene);

        let broken = MemoryEngine::default().with_part(&part(), MemoryPart::default());
        let report = cook(&mut output, &broken, &mut scene);
        assert_eq!(report.parts_skipped, 1);
        assert_eq!(report.nodes.destroyed, 1);
        assert!(output.output_objects().is_empty());
        assert!(output.instanced_outputs().is_empty());
    }

    #[test]
    fn edited_variation_is_realized_without_a_cook() {
        let mut output = InstancerOutput::default();
        let mut scene = RecordingScene::default();
        let engine = engine(&["/Game/A"; 40]);
        cook(&mut output, &engine, &mut scene);

        let id = OutputObjectIdentifier::for_part(&part(), "0");
        output
            .instanced_output_mut(&id)
            .expect("instanced output")
            .add_variation(ObjectRef::mesh("/Game/B"), Transform::IDENTITY);
        assert_eq!(output.changed_instanced_outputs(), vec![id.clone()]);

        let meshes = TranslatedMeshes::default();
        let settings = InstancerSettings::default();
        let ctx = CookContext::new(&engine, &engine, &meshes, &settings);
        let stats = update_changed_instanced_output(&mut output, &id, &ctx, &mut scene).expect("updated");

        assert_eq!(stats.reused, 1);
        assert_eq!(stats.created, 1);
        assert!(output.output_objects().contains_key(&id.with_split("0_1")));
        assert!(output.changed_instanced_outputs().is_empty());

        let unknown = id.with_split("7");
        assert!(matches!(
            update_changed_instanced_output(&mut output, &unknown, &ctx, &mut scene),
            Err(UpdateError::UnknownOutput(_))
        ));
    }
}
