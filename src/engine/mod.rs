//! Inference engines and their cache.
//!
//! The predictive model itself is an external collaborator. This module
//! defines the narrow interface the orchestrator needs from it, plus the
//! cache that keeps loaded engines resident:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 EngineCache                   │
//! │  (WeightsIdentity, Device) ──► CachedEngine   │
//! │                                               │
//! │  miss ──► EngineBackend                       │
//! │             fetch_default_weights()           │
//! │             deserialize(path, Restricted)     │
//! │             deserialize(path, Full)  (opt-in) │
//! │             create_engine()                   │
//! │               load_weights / eval / to        │
//! └──────────────────────────────────────────────┘
//! ```

pub mod bridge;
mod cache;
mod device;

use std::path::{Path, PathBuf};

pub use bridge::{DEFAULT_MODEL_URL, PredictorBridge};
pub use cache::{CachedEngine, EngineCache};
pub use device::{Accelerators, Device, DeviceRequest};

use crate::error::EngineError;

/// Which weights an engine was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WeightsIdentity {
    /// The published model weights.
    Default,
    /// A user checkpoint, identified by its content-addressed path.
    Checkpoint(PathBuf),
}

impl std::fmt::Display for WeightsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Checkpoint(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Cache key: one engine per weights identity and device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineKey {
    pub identity: WeightsIdentity,
    pub device: Device,
}

/// How much a checkpoint's content is trusted during deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeserializeMode {
    /// Tensors only; executable payloads are rejected.
    Restricted,
    /// Full deserialization that trusts the artifact.
    Full,
}

/// Model weights ready to be loaded into an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedWeights {
    pub path: PathBuf,
    pub mode: DeserializeMode,
}

/// One decoded input image handed to `predict`.
#[derive(Debug, Clone, Copy)]
pub struct ImageInput<'a> {
    /// Where the raw upload was written.
    pub path: &'a Path,
    pub image: &'a image::RgbImage,
    pub focal_length_px: f32,
}

/// Opaque geometry produced by the model for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry(pub Vec<u8>);

/// A loaded, device-resident predictor.
pub trait InferenceEngine: Send + Sync {
    fn load_weights(&mut self, weights: SerializedWeights) -> Result<(), EngineError>;

    /// Switch to evaluation mode.
    fn eval(&mut self);

    fn to(&mut self, device: Device) -> Result<(), EngineError>;

    fn predict(&self, input: &ImageInput<'_>, device: Device) -> Result<Geometry, EngineError>;
}

/// Where engines and their weights come from.
pub trait EngineBackend: Send + Sync {
    /// Accelerators present on this machine.
    fn accelerators(&self) -> Accelerators;

    /// Obtain the published weights from their well-known remote source.
    fn fetch_default_weights(&self) -> Result<SerializedWeights, EngineError>;

    /// Deserialize a checkpoint file.
    ///
    /// Must return [`EngineError::Deserialization`] when the content cannot be
    /// read in the given mode, so the cache can decide whether to retry.
    fn deserialize(
        &self,
        path: &Path,
        mode: DeserializeMode,
    ) -> Result<SerializedWeights, EngineError>;

    /// Construct a fresh, unloaded engine.
    fn create_engine(&self) -> Box<dyn InferenceEngine>;
}
