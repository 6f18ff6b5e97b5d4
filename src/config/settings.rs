//! Small JSON settings file remembering the last output folder.
//!
//! Persistence is best-effort: a missing, unreadable, or corrupt file yields
//! defaults and a warning, and a failed write is logged and ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Folder name used under the platform config directory.
pub const APP_DIR_NAME: &str = "SHARP Studio";

/// Persisted user settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_root: Option<PathBuf>,
}

/// Location of the settings file, if persistence is enabled.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: Option<PathBuf>,
}

impl SettingsFile {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// `<config dir>/SHARP Studio/config.json` (Application Support on macOS,
    /// `%APPDATA%` on Windows, `$XDG_CONFIG_HOME` elsewhere).
    pub fn default_location() -> Self {
        Self {
            path: dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config.json")),
        }
    }

    /// A settings file that never reads or writes anything.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load(&self) -> Settings {
        let Some(path) = self.path.as_deref() else {
            return Settings::default();
        };
        if !path.exists() {
            return Settings::default();
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to read config file at {}: {}", path.display(), e);
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        let result = serde_json::to_string_pretty(settings)
            .map_err(std::io::Error::other)
            .and_then(|json| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, json)
            });
        if let Err(e) = result {
            tracing::warn!("Failed to write config file at {}: {}", path.display(), e);
        }
    }
}
