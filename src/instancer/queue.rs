// src/instancer/queue.rs
use bevy::prelude::*;
use std::sync::Arc;

use crate::instancer::attributes::AttributeReader;
use crate::instancer::core::{GeometryPartDescriptor, ObjectResolver, TranslatedMeshes};

/// Engine handles a cook reads from. Kept after the cook so edits can be re-realized.
#[derive(Clone)]
pub struct CookSession {
    pub reader: Arc<dyn AttributeReader>,
    pub resolver: Arc<dyn ObjectResolver>,
    pub meshes: TranslatedMeshes,
}

/// One cook request (which output, which parts, read through which engine).
#[derive(Clone)]
pub struct PendingCook {
    pub output: String,
    /// Parent entity for the output's nodes.
    pub root: Option<Entity>,
    pub parts: Vec<GeometryPartDescriptor>,
    pub session: CookSession,
}

/// Queue resource (filled by whoever talks to the procedural engine).
#[derive(Resource, Default)]
pub struct PendingCooks {
    pub items: Vec<PendingCook>,
}

impl PendingCooks {
    pub fn push(&mut self, cook: PendingCook) {
        // A newer request for the same output supersedes a queued one.
        self.items.retain(|c| c.output != cook.output);
        self.items.push(cook);
    }
}
