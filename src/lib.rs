//! SHARP Studio: a local web studio that turns uploaded photos into 3D
//! Gaussian-splat scenes.
//!
//! The crate is the orchestration layer between the browser and the model:
//! a keyed engine cache, a one-at-a-time run lifecycle, a path guard for
//! everything written or served, and run bundling.

pub mod config;
pub mod desktop;
pub mod engine;
pub mod error;
pub mod media;
pub mod orchestrator;
pub mod safety;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
