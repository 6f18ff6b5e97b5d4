//! Content-addressed storage for uploaded checkpoints.
//!
//! ```text
//! upload bytes ──► SHA-256 ──► <root>/_checkpoints/<hex>.pt
//!                                   │
//!                                   └──► already there? skip the write
//! ```
//!
//! Identical uploads map to the same path, which is what makes them share one
//! engine cache entry.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Directory (under an output root) holding deduplicated checkpoints.
pub const CHECKPOINT_DIR: &str = "_checkpoints";

/// Extension given to stored checkpoints.
const CHECKPOINT_EXTENSION: &str = "pt";

/// Stores checkpoint uploads under their digest.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `<output_root>/_checkpoints`.
    pub fn for_output_root(output_root: &Path) -> Self {
        Self {
            dir: output_root.join(CHECKPOINT_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hex SHA-256 of `content`.
    pub fn digest(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    /// Persist `content` and return its content-addressed path.
    ///
    /// An existing file with the same digest is trusted as-is and never
    /// rewritten.
    pub fn store(&self, content: &[u8]) -> std::io::Result<PathBuf> {
        let digest = Self::digest(content);
        std::fs::create_dir_all(&self.dir)?;

        let path = self
            .dir
            .join(format!("{}.{}", digest, CHECKPOINT_EXTENSION));
        if path.exists() {
            tracing::debug!(digest = %digest, "Checkpoint already stored, skipping write");
        } else {
            std::fs::write(&path, content)?;
            tracing::info!(digest = %digest, bytes = content.len(), "Stored checkpoint upload");
        }

        Ok(path)
    }
}
