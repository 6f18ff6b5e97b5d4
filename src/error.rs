//! Error types for SHARP Studio.

use std::path::PathBuf;

use crate::engine::Device;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Output path must be a folder: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("Could not determine a home directory")]
    NoHomeDirectory,

    #[error("IO error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A path failed the containment check.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Path {} escapes {}", candidate.display(), root.display())]
    Escape { root: PathBuf, candidate: PathBuf },

    #[error("Failed to resolve {}: {source}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while obtaining or running an inference engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(
        "Checkpoint was loaded with unsafe deserialization. \
         Enable unsafe checkpoint loading to use it."
    )]
    UnsafeLoadRejected,

    #[error(
        "Checkpoint could not be loaded with safe deserialization. \
         Enable unsafe checkpoint loading for trusted files."
    )]
    DeserializationRejected { path: PathBuf, reason: String },

    #[error("Failed to deserialize checkpoint {}: {reason}", path.display())]
    Deserialization { path: PathBuf, reason: String },

    #[error("Failed to fetch default weights from {url}: {reason}")]
    DefaultWeights { url: String, reason: String },

    #[error("Inference backend failed: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the image codec or renderer.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to decode image {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Failed to encode {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },

    #[error("Render failed: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while packaging a run.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to walk run directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a single run of the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("No images provided.")]
    NoInput,

    #[error("Device must be one of: cpu, cuda, mps, default (got '{0}')")]
    InvalidDevice(String),

    #[error("{} is not available on this machine.", .0.display_name())]
    DeviceUnavailable(Device),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Failed to write manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Whether the caller can fix this by changing the request.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::NoInput | Self::InvalidDevice(_) | Self::DeviceUnavailable(_) => true,
            Self::Engine(
                EngineError::UnsafeLoadRejected | EngineError::DeserializationRejected { .. },
            ) => true,
            Self::Path(PathError::Escape { .. }) => true,
            _ => false,
        }
    }
}

/// Errors from desktop integration (folder picker, file manager, browser).
#[derive(Debug, thiserror::Error)]
pub enum DesktopError {
    #[error("Folder picker is unavailable on this system.")]
    EnvironmentUnavailable,

    #[error("Failed to open {target}: {reason}")]
    OpenFailed { target: String, reason: String },
}
