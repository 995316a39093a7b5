pub mod attributes;
pub mod context;
pub mod core;
pub mod custom_data;
pub mod memory;
pub mod normalize;
pub mod output;
pub mod part_data;
pub mod plugin;
pub mod queue;
pub mod reconcile;
pub mod scene;
pub mod settings;
pub mod split;
pub mod translator;
pub mod variation;

pub use plugin::{InstancerBridgeConfig, InstancerBridgePlugin, InstancerCooked, InstancerOutputs};
pub use queue::{CookSession, PendingCook, PendingCooks};
pub use translator::{cook_instancer_output, update_changed_instanced_output, InstancerCookReport};
