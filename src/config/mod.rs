//! Host configuration.
//!
//! Settings come from an optional JSON file, then `UMH_CFG_*` environment
//! variables on top. Everything has a default so the host runs with no
//! configuration at all.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const ENV_PREFIX: &str = "UMH_CFG_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Directory the module discovery convention applies to.
    #[serde(default = "default_modules_dir")]
    pub modules_dir: String,

    /// Directory holding the configuration store.
    #[serde(default = "default_conf_dir")]
    pub conf_dir: String,

    /// Log filter, `tracing_subscriber::EnvFilter` syntax. `RUST_LOG`
    /// wins over this when set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Optional log file; stderr when absent.
    #[serde(default)]
    pub log_file: Option<String>,

    /// Process images allowed to host this library. Empty means any.
    #[serde(default)]
    pub controller_images: Vec<String>,

    /// Modules to load at startup (empty = everything discovered).
    #[serde(default)]
    pub autoload: Vec<String>,
}

fn default_modules_dir() -> String {
    "modules".to_string()
}

fn default_conf_dir() -> String {
    "data/conf".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            modules_dir: default_modules_dir(),
            conf_dir: default_conf_dir(),
            log_filter: default_log_filter(),
            log_file: None,
            controller_images: Vec::new(),
            autoload: Vec::new(),
        }
    }
}

impl HostSettings {
    /// Load settings: file (if given), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Apply `UMH_CFG_*` overrides in place.
    pub fn apply_env_overrides(&mut self) {
        for (key, target) in [
            ("MODULES_DIR", &mut self.modules_dir as &mut String),
            ("CONF_DIR", &mut self.conf_dir),
            ("LOG_FILTER", &mut self.log_filter),
        ] {
            if let Ok(value) = std::env::var(format!("{ENV_PREFIX}{key}")) {
                debug!(key, %value, "environment override");
                *target = value;
            }
        }
        if let Ok(value) = std::env::var(format!("{ENV_PREFIX}LOG_FILE")) {
            self.log_file = Some(value);
        }
    }
}
