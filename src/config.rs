//! Engine configuration
//!
//! [`SyncConfig`] carries everything a pass needs to know about the device:
//! which firmware layout to expect, where ROMs and saves live, per-platform
//! folder overrides, and the tuning knobs for identity resolution and
//! parallelism. It is plain serde data so front ends can persist it as JSON.
//!
//! Durations are written as human-readable strings (`"30m"`, `"24h"`).
//!
//! ```rust
//! use savesync::config::SyncConfig;
//! use std::time::Duration;
//!
//! let config: SyncConfig = serde_json::from_str(r#"{
//!     "firmware": "muos",
//!     "rom_root": "/mnt/mmc/ROMS",
//!     "save_root": "/mnt/mmc/MUOS/save/file",
//!     "api_timeout": "5m"
//! }"#).unwrap();
//!
//! assert_eq!(config.api_timeout, Duration::from_secs(300));
//! assert_eq!(config.fuzzy_threshold, 0.80);
//! ```

use crate::error::{Result, SyncError};
use crate::platform::Firmware;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default similarity a fuzzy title match must reach
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.80;

/// Default window during which a failed lookup is not retried
pub const DEFAULT_LOOKUP_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// Default timeout for remote catalog calls
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// User override for one platform's folders
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryMapping {
    /// ROM folder relative to the ROM root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    /// Save folder relative to the save root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_directory: Option<String>,
}

/// Read access to configuration used by scanning and transfers
pub trait ConfigStore: Send + Sync {
    /// Override for a platform, if configured
    fn directory_mapping(&self, platform_key: &str) -> Option<&DirectoryMapping>;

    /// Timeout applied to remote catalog calls
    fn api_timeout(&self) -> Duration;
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Device firmware
    pub firmware: Firmware,
    /// Root containing ROM folders
    pub rom_root: PathBuf,
    /// Root containing save folders
    pub save_root: PathBuf,
    /// Per-platform folder overrides keyed by platform key
    pub directory_mappings: BTreeMap<String, DirectoryMapping>,
    /// Timeout for remote catalog calls
    #[serde(with = "duration_str")]
    pub api_timeout: Duration,
    /// Minimum similarity for a fuzzy title match
    pub fuzzy_threshold: f64,
    /// How long a failed lookup suppresses hashing and catalog queries
    #[serde(with = "duration_str")]
    pub lookup_cooldown: Duration,
    /// Worker threads for per-platform fetches and per-file work
    pub parallel_workers: usize,
    /// Staging folder for uploads
    pub uploads_dir: PathBuf,
    /// Identity cache file; no persistence when unset
    pub cache_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            firmware: Firmware::NextUI,
            rom_root: PathBuf::from("/mnt/SDCARD/Roms"),
            save_root: PathBuf::from("/mnt/SDCARD/Saves"),
            directory_mappings: BTreeMap::new(),
            api_timeout: DEFAULT_API_TIMEOUT,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            lookup_cooldown: DEFAULT_LOOKUP_COOLDOWN,
            parallel_workers: num_cpus::get(),
            uploads_dir: std::env::temp_dir().join("savesync").join("uploads"),
            cache_path: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a JSON file
    ///
    /// # Errors
    ///
    /// - [`SyncError::Io`] if the file cannot be read
    /// - [`SyncError::Json`] if it is not valid configuration JSON
    /// - [`SyncError::InvalidConfiguration`] if a value is out of range
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SyncConfig = serde_json::from_str(&content)?;
        config.validate()?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write configuration as pretty JSON
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        crate::utils::atomic_write(path, json.as_bytes())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.fuzzy_threshold > 0.0 && self.fuzzy_threshold <= 1.0) {
            return Err(SyncError::InvalidConfiguration(format!(
                "fuzzy_threshold must be in (0, 1], got {}",
                self.fuzzy_threshold
            )));
        }
        if self.parallel_workers == 0 {
            return Err(SyncError::InvalidConfiguration(
                "parallel_workers must be at least 1".to_string(),
            ));
        }
        if self.api_timeout.is_zero() {
            return Err(SyncError::InvalidConfiguration(
                "api_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve a save folder override against the save root
    pub fn save_directory_override(&self, platform_key: &str) -> Option<PathBuf> {
        self.directory_mapping(platform_key)
            .and_then(|m| m.save_directory.as_deref())
            .filter(|d| !d.is_empty())
            .map(|d| self.save_root.join(d))
    }

    /// Resolve a ROM folder override against the ROM root
    pub fn rom_directory_override(&self, platform_key: &str) -> Option<PathBuf> {
        self.directory_mapping(platform_key)
            .and_then(|m| m.relative_path.as_deref())
            .filter(|d| !d.is_empty())
            .map(|d| self.rom_root.join(d))
    }
}

impl ConfigStore for SyncConfig {
    fn directory_mapping(&self, platform_key: &str) -> Option<&DirectoryMapping> {
        self.directory_mappings.get(platform_key)
    }

    fn api_timeout(&self) -> Duration {
        self.api_timeout
    }
}

/// Serde adapter writing durations through `humantime`
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
