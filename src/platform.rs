//! Firmware layouts and platform directory tables
//!
//! Handheld firmwares disagree on how ROM and save folders are named. Some
//! (NextUI) put a parenthesized tag in every folder name, e.g.
//! `Game Boy Advance (GBA)`, and the tag is what identifies the platform.
//! Others (muOS, Knulli) use a fixed folder per platform. The
//! [`PlatformDirectoryMap`] trait is the seam for those tables; the engine
//! never hardcodes a firmware's folder names.

use crate::error::Result;
use crate::naming;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Supported device firmwares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Firmware {
    /// Tag-named folders under a single ROM root
    #[default]
    NextUI,
    /// Fixed folder per platform
    MuOS,
    /// Fixed folder per platform
    Knulli,
}

/// How ROM folders are discovered on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareLayout {
    /// Folders carry a `(TAG)` matched against the platform table
    TagBased,
    /// Each platform has a known folder name
    DirectPath,
}

impl Firmware {
    /// Directory layout used by this firmware
    pub fn layout(&self) -> FirmwareLayout {
        match self {
            Firmware::NextUI => FirmwareLayout::TagBased,
            Firmware::MuOS | Firmware::Knulli => FirmwareLayout::DirectPath,
        }
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Firmware::NextUI => write!(f, "nextui"),
            Firmware::MuOS => write!(f, "muos"),
            Firmware::Knulli => write!(f, "knulli"),
        }
    }
}

/// Per-firmware table of ROM and save folders for each platform key
///
/// Folder names are relative to the configured ROM and save roots. For
/// tag-based firmwares the ROM entries are folder names whose tags identify
/// the platform; for direct-path firmwares the first ROM entry is the folder.
pub trait PlatformDirectoryMap: Send + Sync {
    /// All platform keys known for a firmware
    fn platform_keys(&self, firmware: Firmware) -> Vec<String>;

    /// ROM folder names for a platform
    fn rom_directories(&self, firmware: Firmware, platform_key: &str) -> Vec<String>;

    /// Save folder names for a platform, in preference order
    fn save_directories(&self, firmware: Firmware, platform_key: &str) -> Vec<String>;

    /// Tag identifying a folder name
    fn tag_of(&self, directory_name: &str) -> Option<String> {
        naming::parse_tag(directory_name)
    }
}

/// Folders for one platform
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformDirectories {
    /// ROM folder names
    #[serde(default)]
    pub roms: Vec<String>,
    /// Save folder names
    #[serde(default)]
    pub saves: Vec<String>,
}

/// In-memory [`PlatformDirectoryMap`] keyed by firmware and platform key
///
/// # Example
///
/// ```rust
/// use savesync::platform::{Firmware, PlatformDirectoryMap, StaticDirectoryMap};
///
/// let map = StaticDirectoryMap::new()
///     .with_platform(Firmware::MuOS, "gba", &["gba"], &["mGBA", "VBA-M"]);
/// assert_eq!(map.save_directories(Firmware::MuOS, "gba"), vec!["mGBA", "VBA-M"]);
/// assert!(map.platform_keys(Firmware::NextUI).is_empty());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticDirectoryMap {
    tables: BTreeMap<String, BTreeMap<String, PlatformDirectories>>,
}

impl StaticDirectoryMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the folders for one platform
    pub fn with_platform(
        mut self,
        firmware: Firmware,
        platform_key: &str,
        roms: &[&str],
        saves: &[&str],
    ) -> Self {
        self.tables.entry(firmware.to_string()).or_default().insert(
            platform_key.to_string(),
            PlatformDirectories {
                roms: roms.iter().map(|s| s.to_string()).collect(),
                saves: saves.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    /// Load a map from a JSON file shaped `{ "<firmware>": { "<key>": { "roms": [..], "saves": [..] } } }`
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn entry(&self, firmware: Firmware, platform_key: &str) -> Option<&PlatformDirectories> {
        self.tables.get(&firmware.to_string())?.get(platform_key)
    }
}

impl PlatformDirectoryMap for StaticDirectoryMap {
    fn platform_keys(&self, firmware: Firmware) -> Vec<String> {
        self.tables
            .get(&firmware.to_string())
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn rom_directories(&self, firmware: Firmware, platform_key: &str) -> Vec<String> {
        self.entry(firmware, platform_key)
            .map(|e| e.roms.clone())
            .unwrap_or_default()
    }

    fn save_directories(&self, firmware: Firmware, platform_key: &str) -> Vec<String> {
        self.entry(firmware, platform_key)
            .map(|e| e.saves.clone())
            .unwrap_or_default()
    }
}
