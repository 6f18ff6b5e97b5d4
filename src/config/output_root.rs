//! Resolution of the folder runs are written into.

use std::path::{Path, PathBuf};

use crate::config::settings::{APP_DIR_NAME, Settings, SettingsFile};
use crate::error::ConfigError;

/// `<Documents or home>/SHARP Studio/Outputs`.
pub fn default_output_root() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
    let base = dirs::document_dir()
        .filter(|dir| dir.is_dir())
        .unwrap_or(home);
    Ok(base.join(APP_DIR_NAME).join("Outputs"))
}

/// Expand `~`, make absolute, create if missing, and canonicalize.
///
/// Fails if the path exists but is not a directory.
pub fn normalize_output_root(path: &Path) -> Result<PathBuf, ConfigError> {
    let expanded = expand_home(path);
    let absolute = std::path::absolute(&expanded).map_err(|e| ConfigError::Io {
        path: expanded.clone(),
        source: e,
    })?;

    if absolute.exists() && !absolute.is_dir() {
        return Err(ConfigError::NotADirectory { path: absolute });
    }
    std::fs::create_dir_all(&absolute).map_err(|e| ConfigError::Io {
        path: absolute.clone(),
        source: e,
    })?;
    absolute.canonicalize().map_err(|e| ConfigError::Io {
        path: absolute,
        source: e,
    })
}

/// Pick the startup output root.
///
/// An explicit path wins and is persisted. Otherwise the persisted root is
/// used if it still normalizes, falling back to [`default_output_root`].
pub fn load_output_root(
    explicit: Option<&Path>,
    settings: &SettingsFile,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        let normalized = normalize_output_root(path)?;
        settings.save(&Settings {
            output_root: Some(normalized.clone()),
        });
        return Ok(normalized);
    }

    if let Some(configured) = settings.load().output_root {
        match normalize_output_root(&configured) {
            Ok(normalized) => return Ok(normalized),
            Err(e) => {
                tracing::warn!("Configured output root is invalid, using default: {}", e);
            }
        }
    }

    normalize_output_root(&default_output_root()?)
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
