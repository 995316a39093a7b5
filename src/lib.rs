//! Instancer reconciliation for a procedural-content bridge.
//!
//! Cooked instancer parts are normalized into (object, transforms) tuples, expanded into
//! per-variation subsets and reconciled against the nodes created by the previous cook.

pub mod instancer;
