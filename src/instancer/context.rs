// src/instancer/context.rs
//! Everything a cook reads but does not own.

use super::attributes::AttributeReader;
use super::core::{ObjectRef, ObjectResolver, TranslatedMeshes};
use super::settings::InstancerSettings;

/// Collaborators injected into one cook. Nothing here is global.
pub struct CookContext<'a> {
    pub reader: &'a dyn AttributeReader,
    pub resolver: &'a dyn ObjectResolver,
    pub meshes: &'a TranslatedMeshes,
    pub settings: &'a InstancerSettings,
    /// Substitute for unresolved references; `None` disables substitution.
    pub placeholder: Option<ObjectRef>,
}

impl<'a> CookContext<'a> {
    /// Build a context, resolving the placeholder from the settings.
    pub fn new(
        reader: &'a dyn AttributeReader,
        resolver: &'a dyn ObjectResolver,
        meshes: &'a TranslatedMeshes,
        settings: &'a InstancerSettings,
    ) -> Self {
        let placeholder = if settings.show_default_placeholder {
            resolver.resolve(&settings.placeholder_path)
        } else {
            None
        };
        Self { reader, resolver, meshes, settings, placeholder }
    }
}
