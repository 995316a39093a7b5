// src/instancer/settings.rs
//! Data-driven instancer settings + loader.

use bevy::asset::{io::Reader, AssetLoader, LoadContext};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::core::SCALE_SMALL_VALUE;

// ---------- Public plugin to register asset+loader ----------

pub struct InstancerSettingsAssetPlugin;

impl Plugin for InstancerSettingsAssetPlugin {
    fn build(&self, app: &mut App) {
        app.init_asset::<InstancerSettings>()
            .register_asset_loader(InstancerSettingsLoader);
    }
}

// ---------- Variation generator (data form) ----------

/// Which generator picks a variation per instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariationGenerator {
    /// Linear congruential generator; assignments match the engine's other hosts bit for bit.
    #[default]
    Legacy,
    /// ChaCha8 stream seeded from `variation_seed`.
    ChaCha,
}

// ---------- Settings asset ----------

#[derive(Asset, TypePath, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstancerSettings {
    /// Substitute unresolved instance references with the placeholder mesh.
    #[serde(default = "default_true")]
    pub show_default_placeholder: bool,

    /// Object path of the placeholder, resolved at the start of every cook.
    #[serde(default = "default_placeholder_path")]
    pub placeholder_path: String,

    #[serde(default = "default_variation_seed")]
    pub variation_seed: i32,

    #[serde(default)]
    pub variation_generator: VariationGenerator,

    /// Minimum scale magnitude per axis after offsets.
    #[serde(default = "default_scale_epsilon")]
    pub scale_epsilon: f32,

    /// Meshes with more LODs than this get hierarchical instancing.
    #[serde(default = "default_lod_threshold")]
    pub lod_threshold_for_hierarchical: u32,
}

fn default_true() -> bool {
    true
}
fn default_placeholder_path() -> String {
    "/Engine/BasicShapes/Cube".to_string()
}
fn default_variation_seed() -> i32 {
    1234
}
fn default_scale_epsilon() -> f32 {
    SCALE_SMALL_VALUE
}
fn default_lod_threshold() -> u32 {
    1
}

impl Default for InstancerSettings {
    fn default() -> Self {
        Self {
            show_default_placeholder: default_true(),
            placeholder_path: default_placeholder_path(),
            variation_seed: default_variation_seed(),
            variation_generator: VariationGenerator::default(),
            scale_epsilon: default_scale_epsilon(),
            lod_threshold_for_hierarchical: default_lod_threshold(),
        }
    }
}

impl InstancerSettings {
    /// Parse settings outside the asset pipeline.
    pub fn from_ron_str(text: &str) -> Result<Self, SettingsLoadError> {
        let settings: InstancerSettings =
            ron::de::from_str(text).map_err(|e| SettingsLoadError::Ron(e.to_string()))?;
        settings.validate()
    }

    fn validate(self) -> Result<Self, SettingsLoadError> {
        if !(self.scale_epsilon.is_finite() && self.scale_epsilon > 0.0) {
            return Err(SettingsLoadError::InvalidScaleEpsilon(self.scale_epsilon));
        }
        Ok(self)
    }
}

// ---------- Asset loader for `.instancer.ron` ----------

#[derive(Default)]
pub struct InstancerSettingsLoader;

impl AssetLoader for InstancerSettingsLoader {
    type Asset = InstancerSettings;
    type Settings = ();
    type Error = SettingsLoadError;

    fn extensions(&self) -> &[&str] {
        &["instancer.ron"]
    }

    async fn load(
        &self,
        reader: &mut dyn Reader,
        _settings: &Self::Settings,
        _load_context: &mut LoadContext<'_>,
    ) -> Result<Self::Asset, Self::Error> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;
        let settings: InstancerSettings =
            ron::de::from_bytes(&bytes).map_err(|e| SettingsLoadError::Ron(e.to_string()))?;
        settings.validate()
    }
}

// ---------- Loader errors ----------

#[derive(thiserror::Error, Debug)]
pub enum SettingsLoadError {
    #[error("I/O while reading instancer settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(String),
    #[error("scale_epsilon must be a positive finite number, got {0}")]
    InvalidScaleEpsilon(f32),
}
