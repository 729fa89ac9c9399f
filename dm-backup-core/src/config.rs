use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default deadline for listing and version-resolution calls.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Tunables for a backup run. Every field has a default, so an empty YAML section is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Deadline for a project's top-level listing and every folder listing.
    #[serde(default = "default_timeout_ms")]
    pub listing_timeout_ms: u64,
    /// Deadline for resolving an item's version list.
    #[serde(default = "default_timeout_ms")]
    pub version_timeout_ms: u64,
    /// Deflate level 0-9; `None` uses the encoder default.
    #[serde(default)]
    pub compression_level: Option<i64>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            listing_timeout_ms: DEFAULT_TIMEOUT_MS,
            version_timeout_ms: DEFAULT_TIMEOUT_MS,
            compression_level: None,
        }
    }
}

impl BackupConfig {
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_millis(self.listing_timeout_ms)
    }

    pub fn version_timeout(&self) -> Duration {
        Duration::from_millis(self.version_timeout_ms)
    }

    pub fn trace_loaded(&self) {
        info!(
            listing_timeout_ms = self.listing_timeout_ms,
            version_timeout_ms = self.version_timeout_ms,
            compression_level = ?self.compression_level,
            "Loaded BackupConfig"
        );
        debug!(?self, "BackupConfig loaded (full debug)");
    }
}
