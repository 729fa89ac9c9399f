/// `load_config` module: parses the static YAML config file into the CLI's typed config.
///
/// The file never carries secrets. The access token is supplied separately through
/// `--token` or `APS_ACCESS_TOKEN`.
///
/// # Accepted schema
/// ```yaml
/// service:
///   base_url: https://developer.api.autodesk.com   # optional
/// backup:                                          # optional, every key defaulted
///   listing_timeout_ms: 15000
///   version_timeout_ms: 15000
///   compression_level: 6
/// ```
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use dm_backup_core::BackupConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

use crate::client::DEFAULT_BASE_URL;

#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Loads a static YAML config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if config.service.base_url.trim().is_empty() {
        return Err(anyhow::anyhow!("service.base_url must not be empty"));
    }
    config.backup.trace_loaded();
    Ok(config)
}

/// Loads `path` when given, otherwise returns the built-in defaults.
pub fn load_optional(path: Option<&Path>) -> Result<CliConfig> {
    match path {
        Some(path) => load_config(path),
        None => {
            info!("No config file given, using defaults");
            Ok(CliConfig::default())
        }
    }
}
