//! Local ROM and save discovery
//!
//! The [`DirectoryScanner`] walks the device's ROM folders and attaches to
//! each ROM the save file that shares its base name. Two layouts exist:
//!
//! - **Tag-based**: every folder under the ROM root whose name carries a
//!   `(TAG)` is matched against each platform's known folder tags (and any
//!   configured override). Runs sequentially.
//! - **Direct-path**: each platform has one folder, either the configured
//!   override or the first table entry. Platforms are scanned in parallel.
//!
//! Hidden entries and non-files are ignored. A missing folder is simply
//! empty. A folder that exists but cannot be read becomes a
//! [`PlatformFailure`] and the scan carries on with the other platforms.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::naming;
use crate::parallel;
use crate::platform::{FirmwareLayout, PlatformDirectoryMap};
use crate::types::{LocalRomFile, LocalSave, PlatformFailure};
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

/// Local saves of one platform keyed by base name
pub type SaveIndex = HashMap<String, LocalSave>;

/// Result of scanning the device
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// ROMs per platform key, each list sorted by file name
    pub roms: BTreeMap<String, Vec<LocalRomFile>>,
    /// Folders that could not be read
    pub errors: Vec<PlatformFailure>,
}

impl ScanOutcome {
    /// Total ROMs found
    pub fn rom_count(&self) -> usize {
        self.roms.values().map(Vec::len).sum()
    }

    /// ROMs that have a local save attached
    pub fn save_count(&self) -> usize {
        self.roms
            .values()
            .flatten()
            .filter(|r| r.local_save.is_some())
            .count()
    }
}

/// A candidate save folder for a platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmulatorDirectory {
    /// Folder name relative to the save root
    pub directory_name: String,
    /// Absolute folder path
    pub path: PathBuf,
    /// Whether the folder holds any visible file
    pub has_saves: bool,
    /// Number of visible files in the folder
    pub save_count: usize,
}

/// Walks ROM and save folders according to the firmware layout
pub struct DirectoryScanner<'a> {
    config: &'a SyncConfig,
    directory_map: &'a dyn PlatformDirectoryMap,
}

impl<'a> DirectoryScanner<'a> {
    /// Create a scanner
    pub fn new(config: &'a SyncConfig, directory_map: &'a dyn PlatformDirectoryMap) -> Self {
        Self {
            config,
            directory_map,
        }
    }

    /// Scan every platform
    ///
    /// # Errors
    ///
    /// - [`SyncError::ThreadPool`] if the worker pool cannot be created.
    ///   Unreadable folders are reported in [`ScanOutcome::errors`] instead.
    #[instrument(skip(self), fields(firmware = %self.config.firmware))]
    pub fn scan(&self) -> Result<ScanOutcome> {
        let outcome = match self.config.firmware.layout() {
            FirmwareLayout::TagBased => self.scan_tagged(),
            FirmwareLayout::DirectPath => self.scan_direct()?,
        };

        info!(
            "Scanned {} platforms: {} ROMs, {} with saves, {} errors",
            outcome.roms.len(),
            outcome.rom_count(),
            outcome.save_count(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    fn scan_tagged(&self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let root = &self.config.rom_root;

        if !root.exists() {
            info!("ROM root {:?} does not exist", root);
            return outcome;
        }

        let entries = match list_directory(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list ROM root {:?}: {}", root, e);
                outcome.errors.push(PlatformFailure {
                    platform: root.display().to_string(),
                    message: e.to_string(),
                });
                return outcome;
            }
        };

        let keys = self.directory_map.platform_keys(self.config.firmware);
        let mut save_indexes: HashMap<String, SaveIndex> = HashMap::new();

        for entry in entries.iter().filter(|e| e.file_type().is_dir()) {
            let dir_name = entry.file_name().to_string_lossy();
            let Some(tag) = self.directory_map.tag_of(&dir_name) else {
                continue;
            };

            for key in keys.iter().filter(|k| self.platform_has_tag(k, &tag)) {
                let index = save_indexes
                    .entry(key.clone())
                    .or_insert_with(|| self.build_save_index(key));

                match scan_rom_directory(key, entry.path(), index) {
                    Ok(roms) => {
                        debug!("{:?}: {} ROMs for {}", entry.path(), roms.len(), key);
                        if !roms.is_empty() {
                            outcome.roms.entry(key.clone()).or_default().extend(roms);
                        }
                    }
                    Err(e) => {
                        warn!("Failed to scan {:?}: {}", entry.path(), e);
                        outcome.errors.push(PlatformFailure {
                            platform: key.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        for roms in outcome.roms.values_mut() {
            roms.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        }
        outcome
    }

    fn platform_has_tag(&self, platform_key: &str, tag: &str) -> bool {
        let firmware = self.config.firmware;
        let table_match = self
            .directory_map
            .rom_directories(firmware, platform_key)
            .iter()
            .filter_map(|dir| self.directory_map.tag_of(dir))
            .any(|t| t == tag);

        let override_match = self
            .config
            .directory_mappings
            .get(platform_key)
            .and_then(|m| m.relative_path.as_deref())
            .and_then(|p| self.directory_map.tag_of(p))
            .is_some_and(|t| t == tag);

        table_match || override_match
    }

    fn scan_direct(&self) -> Result<ScanOutcome> {
        let keys = self.directory_map.platform_keys(self.config.firmware);

        let outcomes = parallel::map_keys(keys, self.config.parallel_workers, |key| {
            let Some(dir) = self.rom_directory(key) else {
                return Ok(Vec::new());
            };
            if !dir.exists() {
                debug!("ROM folder {:?} for {} does not exist", dir, key);
                return Ok(Vec::new());
            }
            let index = self.build_save_index(key);
            scan_rom_directory(key, &dir, &index)
        })?;

        let (found, failed) = parallel::partition(outcomes);
        let mut outcome = ScanOutcome::default();

        for (key, roms) in found {
            if !roms.is_empty() {
                outcome.roms.insert(key, roms);
            }
        }
        for (key, e) in failed {
            warn!("Failed to scan platform {}: {}", key, e);
            outcome.errors.push(PlatformFailure {
                platform: key,
                message: e.to_string(),
            });
        }

        Ok(outcome)
    }

    /// ROM folder for a direct-path platform
    fn rom_directory(&self, platform_key: &str) -> Option<PathBuf> {
        self.config.rom_directory_override(platform_key).or_else(|| {
            self.directory_map
                .rom_directories(self.config.firmware, platform_key)
                .first()
                .map(|d| self.config.rom_root.join(d))
        })
    }

    /// Save folders searched for a platform, override first
    pub fn save_folders(&self, platform_key: &str) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = Vec::new();
        if let Some(dir) = self.config.save_directory_override(platform_key) {
            folders.push(dir);
        }
        for name in self
            .directory_map
            .save_directories(self.config.firmware, platform_key)
        {
            let dir = self.config.save_root.join(name);
            if !folders.contains(&dir) {
                folders.push(dir);
            }
        }
        folders
    }

    /// Index every visible save file of a platform by base name
    ///
    /// When the same base name appears in several folders the most recently
    /// modified file wins. Unreadable folders are logged and skipped.
    pub fn build_save_index(&self, platform_key: &str) -> SaveIndex {
        let mut index = SaveIndex::new();

        for folder in self.save_folders(platform_key) {
            if !folder.exists() {
                continue;
            }

            let entries = match list_directory(&folder) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Cannot read save folder {:?}: {}", folder, e);
                    continue;
                }
            };

            for entry in entries.iter().filter(|e| is_visible_file(e)) {
                let last_modified = match entry.metadata().map_err(SyncError::from).and_then(|m| {
                    m.modified()
                        .map(DateTime::<Utc>::from)
                        .map_err(SyncError::from)
                }) {
                    Ok(time) => time,
                    Err(e) => {
                        warn!("Cannot stat save {:?}: {}", entry.path(), e);
                        continue;
                    }
                };

                let file_name = entry.file_name().to_string_lossy();
                let base = naming::strip_extension(&file_name).to_string();
                let save = LocalSave {
                    platform_key: platform_key.to_string(),
                    path: entry.path().to_path_buf(),
                    last_modified,
                };

                match index.get(&base) {
                    Some(existing) if existing.last_modified >= save.last_modified => {}
                    _ => {
                        index.insert(base, save);
                    }
                }
            }
        }

        debug!("Indexed {} saves for {}", index.len(), platform_key);
        index
    }
}

/// Scan one ROM folder, attaching saves from `index`
fn scan_rom_directory(platform_key: &str, dir: &Path, index: &SaveIndex) -> Result<Vec<LocalRomFile>> {
    let entries = list_directory(dir)?;

    Ok(entries
        .iter()
        .filter(|e| is_visible_file(e))
        .map(|entry| {
            let mut rom = LocalRomFile::new(platform_key, entry.path().to_path_buf());
            rom.local_save = index.get(rom.base_name()).cloned();
            rom
        })
        .collect())
}

/// Immediate children of a folder, sorted by name
///
/// Failing to open the folder itself is an error; unreadable children are
/// logged and skipped.
fn list_directory(dir: &Path) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        match entry {
            Ok(entry) => entries.push(entry),
            Err(e) if e.depth() == 0 => {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                return Err(SyncError::Scan {
                    path: dir.to_path_buf(),
                    source,
                });
            }
            Err(e) => warn!("Skipping unreadable entry in {:?}: {}", dir, e),
        }
    }

    Ok(entries)
}

fn is_visible_file(entry: &DirEntry) -> bool {
    !utils::is_hidden(&entry.file_name().to_string_lossy()) && entry.path().is_file()
}

/// Candidate save folders for a platform with their save counts
///
/// Used to offer a folder choice when a download has no local save to
/// replace and the platform has several emulators.
pub fn emulator_directories(
    config: &SyncConfig,
    directory_map: &dyn PlatformDirectoryMap,
    platform_key: &str,
) -> Vec<EmulatorDirectory> {
    directory_map
        .save_directories(config.firmware, platform_key)
        .into_iter()
        .map(|name| {
            let path = config.save_root.join(&name);
            let save_count = if path.is_dir() {
                list_directory(&path)
                    .map(|entries| entries.iter().filter(|e| is_visible_file(e)).count())
                    .unwrap_or(0)
            } else {
                0
            };

            EmulatorDirectory {
                directory_name: name,
                path,
                has_saves: save_count > 0,
                save_count,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryMapping;
    use crate::platform::{Firmware, StaticDirectoryMap};
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
    }

    fn config(temp_dir: &TempDir, firmware: Firmware) -> SyncConfig {
        SyncConfig {
            firmware,
            rom_root: temp_dir.path().join("roms"),
            save_root: temp_dir.path().join("saves"),
            parallel_workers: 2,
            ..Default::default()
        }
    }

    fn direct_map() -> StaticDirectoryMap {
        StaticDirectoryMap::new()
            .with_platform(Firmware::MuOS, "gba", &["gba"], &["mGBA", "VBA-M"])
            .with_platform(Firmware::MuOS, "snes", &["snes"], &["Snes9x"])
            .with_platform(Firmware::MuOS, "nes", &["nes"], &["FCEUmm"])
    }

    #[test]
    fn test_direct_layout_attaches_saves() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, Firmware::MuOS);
        touch(&config.rom_root.join("gba/zelda.gba"));
        touch(&config.rom_root.join("gba/metroid.gba"));
        touch(&config.rom_root.join("gba/.hidden.gba"));
        fs::create_dir_all(config.rom_root.join("gba/subdir")).unwrap();
        touch(&config.save_root.join("mGBA/zelda.sav"));
        touch(&config.save_root.join("mGBA/.zelda.sav"));
        touch(&config.rom_root.join("snes/mario.sfc"));

        let map = direct_map();
        let outcome = DirectoryScanner::new(&config, &map).scan().unwrap();

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.roms.len(), 2);
        let gba = &outcome.roms["gba"];
        let names: Vec<&str> = gba.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["metroid.gba", "zelda.gba"]);

        let zelda = &gba[1];
        let save = zelda.local_save.as_ref().unwrap();
        assert_eq!(save.path, config.save_root.join("mGBA/zelda.sav"));
        assert_eq!(save.platform_key, "gba");
        assert!(gba[0].local_save.is_none());

        assert_eq!(outcome.rom_count(), 3);
        assert_eq!(outcome.save_count(), 1);
    }

    #[test]
    fn test_missing_roots_are_empty() {
        let temp_dir = TempDir::new().unwrap();
        let map = direct_map();

        let config = config(&temp_dir, Firmware::MuOS);
        let outcome = DirectoryScanner::new(&config, &map).scan().unwrap();
        assert!(outcome.roms.is_empty());
        assert!(outcome.errors.is_empty());

        let config = SyncConfig {
            firmware: Firmware::NextUI,
            ..config
        };
        let outcome = DirectoryScanner::new(&config, &map).scan().unwrap();
        assert!(outcome.roms.is_empty());
    }

    #[test]
    fn test_direct_layout_uses_override() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(&temp_dir, Firmware::MuOS);
        config.directory_mappings.insert(
            "gba".to_string(),
            DirectoryMapping {
                relative_path: Some("Game Boy Advance".to_string()),
                save_directory: Some("custom-saves".to_string()),
            },
        );
        touch(&config.rom_root.join("Game Boy Advance/zelda.gba"));
        touch(&config.rom_root.join("gba/ignored.gba"));
        touch(&config.save_root.join("custom-saves/zelda.srm"));

        let map = direct_map();
        let outcome = DirectoryScanner::new(&config, &map).scan().unwrap();

        let gba = &outcome.roms["gba"];
        assert_eq!(gba.len(), 1);
        assert_eq!(gba[0].file_name, "zelda.gba");
        assert_eq!(
            gba[0].local_save.as_ref().unwrap().path,
            config.save_root.join("custom-saves/zelda.srm")
        );
    }

    #[test]
    fn test_tagged_layout_matches_tags() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, Firmware::NextUI);
        let map = StaticDirectoryMap::new()
            .with_platform(Firmware::NextUI, "gba", &["Game Boy Advance (GBA)", "GBA (MGBA)"], &["GBA"])
            .with_platform(Firmware::NextUI, "gb", &["Game Boy (GB)"], &["GB"]);

        touch(&config.rom_root.join("Game Boy Advance (GBA)/zelda.gba"));
        touch(&config.rom_root.join("01) Handheld (MGBA)/pokemon.gba"));
        touch(&config.rom_root.join("Game Boy (GB)/tetris.gb"));
        touch(&config.rom_root.join("Untagged/ignored.bin"));
        touch(&config.rom_root.join("Other (PS)/ff7.bin"));
        touch(&config.save_root.join("GBA/pokemon.sav"));

        let outcome = DirectoryScanner::new(&config, &map).scan().unwrap();

        assert_eq!(outcome.roms.len(), 2);
        let gba: Vec<&str> = outcome.roms["gba"].iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(gba, vec!["pokemon.gba", "zelda.gba"]);
        assert!(outcome.roms["gba"][0].local_save.is_some());
        assert_eq!(outcome.roms["gb"].len(), 1);
    }

    #[test]
    fn test_newest_save_wins_across_folders() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, Firmware::MuOS);
        let older = config.save_root.join("mGBA/zelda.sav");
        let newer = config.save_root.join("VBA-M/zelda.srm");
        touch(&older);
        touch(&newer);
        utils::set_modified_time(&older, &"2024-01-01T00:00:00Z".parse().unwrap()).unwrap();
        utils::set_modified_time(&newer, &"2024-02-01T00:00:00Z".parse().unwrap()).unwrap();

        let map = direct_map();
        let index = DirectoryScanner::new(&config, &map).build_save_index("gba");
        assert_eq!(index["zelda"].path, newer);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_platform_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, Firmware::MuOS);
        touch(&config.rom_root.join("gba/zelda.gba"));
        touch(&config.rom_root.join("snes/mario.sfc"));
        let locked = config.rom_root.join("snes");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not apply to root
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let map = direct_map();
        let outcome = DirectoryScanner::new(&config, &map).scan().unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(outcome.roms["gba"].len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].platform, "snes");
    }

    #[test]
    fn test_emulator_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, Firmware::MuOS);
        touch(&config.save_root.join("VBA-M/a.sav"));
        touch(&config.save_root.join("VBA-M/b.sav"));

        let map = direct_map();
        let dirs = emulator_directories(&config, &map, "gba");

        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0].directory_name, "mGBA");
        assert!(!dirs[0].has_saves);
        assert_eq!(dirs[1].save_count, 2);
        assert!(dirs[1].has_saves);
    }
}
