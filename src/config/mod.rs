//! Configuration for SHARP Studio.
//!
//! Settings are resolved with priority: CLI flag > env var > persisted
//! settings > default. `.env` in the working directory is loaded via dotenvy
//! early in startup, so it behaves like real env vars.

pub(crate) mod helpers;
mod output_root;
mod settings;

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::ConfigError;

use self::helpers::{optional_env, parse_bool_env, parse_optional_env, parse_string_env};

pub use self::helpers::parse_bool;
pub use self::output_root::{default_output_root, load_output_root, normalize_output_root};
pub use self::settings::{APP_DIR_NAME, Settings, SettingsFile};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7860;
pub const DEFAULT_PREDICTOR_BIN: &str = "sharp";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 1024;

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub output_path: Option<PathBuf>,
    pub no_browser: bool,
}

/// Main configuration for the studio server.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Explicit output root from the CLI or env. `None` defers to the
    /// persisted settings and then the default location.
    pub output_root: Option<PathBuf>,
    pub open_browser: bool,
    pub max_upload_bytes: usize,
    /// Folder with a custom `index.html` and `/static` assets. `None` serves
    /// the built-in page.
    pub ui_dir: Option<PathBuf>,
    pub predictor: PredictorConfig,
}

/// How to reach the external predictor program.
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub program: PathBuf,
    /// Overrides the well-known default weights URL.
    pub model_url: Option<String>,
    /// Where downloaded default weights are kept.
    pub cache_dir: PathBuf,
}

impl PredictorConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME);

        Ok(Self {
            program: PathBuf::from(parse_string_env(
                "SHARP_PREDICTOR_BIN",
                DEFAULT_PREDICTOR_BIN,
            )?),
            model_url: optional_env("SHARP_MODEL_URL")?,
            cache_dir,
        })
    }
}

impl Config {
    /// Resolve configuration from env vars, with CLI flags taking priority.
    pub fn resolve(cli: CliOverrides) -> Result<Self, ConfigError> {
        let host = match cli.host {
            Some(host) => host,
            None => parse_string_env("SHARP_GUI_HOST", DEFAULT_HOST)?,
        };
        let port = match cli.port {
            Some(port) => port,
            None => parse_optional_env("SHARP_GUI_PORT", DEFAULT_PORT)?,
        };
        let output_root = match cli.output_path {
            Some(path) => Some(path),
            None => optional_env("SHARP_GUI_OUTPUT_ROOT")?.map(PathBuf::from),
        };
        let no_browser = cli.no_browser || parse_bool_env("SHARP_GUI_NO_BROWSER", false)?;
        let max_upload_mb: usize = parse_optional_env("SHARP_MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)?;
        if max_upload_mb == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SHARP_MAX_UPLOAD_MB".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            output_root,
            open_browser: !no_browser,
            max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
            ui_dir: optional_env("SHARP_GUI_STATIC_DIR")?.map(PathBuf::from),
            predictor: PredictorConfig::resolve()?,
        })
    }

    /// Socket address to bind, rejecting hosts that are not IP literals
    /// other than `localhost`.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = if self.host.eq_ignore_ascii_case("localhost") {
            DEFAULT_HOST
        } else {
            self.host.as_str()
        };
        let ip = host.parse().map_err(|_| ConfigError::InvalidValue {
            key: "SHARP_GUI_HOST".to_string(),
            message: format!("'{}' is not an IP address", self.host),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// URL the browser is pointed at.
    pub fn browser_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}
