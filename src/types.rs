//! Core data types used throughout the savesync library
//!
//! This module contains the data structures shared across the scanner,
//! resolver, planner, executor and reconciler.
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Local state**: `LocalRomFile`, `LocalSave` - what is on the device
//! - **Remote state**: `RemoteSave`, `Platform`, `CatalogRom` - what the library reports
//! - **Decisions**: `SyncAction`, `SaveSync`, `SyncPlan` - what a pass intends to do
//! - **Outcomes**: `SyncResult`, `UnmatchedSave`, `PendingFuzzyMatch`, `ReconcileReport`
//! - **Progress**: `PassPhase`, `ProgressInfo`, `ProgressCallback`
//!
//! ## Examples
//!
//! ```rust
//! use savesync::types::{LocalRomFile, SyncAction};
//! use std::path::PathBuf;
//!
//! let rom = LocalRomFile::new("gba", PathBuf::from("/roms/GBA/zelda.gba"));
//! assert_eq!(rom.base_name(), "zelda");
//! assert_eq!(SyncAction::Download.to_string(), "download");
//! ```

use crate::naming;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// A save file found on the device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalSave {
    /// Platform the save belongs to
    pub platform_key: String,
    /// Absolute path of the save file
    pub path: PathBuf,
    /// Last modification time of the file
    pub last_modified: DateTime<Utc>,
}

impl LocalSave {
    /// File name component of the save path
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Save file name without its extension
    pub fn base_name(&self) -> String {
        naming::strip_extension(&self.file_name()).to_string()
    }

    /// Directory containing the save
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Name of the directory containing the save, used as the emulator tag
    pub fn emulator_tag(&self) -> String {
        self.directory()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A save stored in the remote library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteSave {
    /// Remote save identifier
    pub id: u64,
    /// Remote ROM this save belongs to
    pub remote_rom_id: u64,
    /// File name as stored remotely (may carry an upload timestamp suffix)
    pub file_name: String,
    /// File extension without the leading dot, e.g. `"sav"`
    pub file_extension: String,
    /// Opaque path used to download the content
    pub download_path: String,
    /// Last update time reported by the library
    pub updated_at: DateTime<Utc>,
    /// Emulator the save was uploaded from, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulator_tag: Option<String>,
}

impl RemoteSave {
    /// Base name used to match against local ROMs
    ///
    /// Strips `.{file_extension}` first, then the upload timestamp suffix.
    pub fn base_name(&self) -> String {
        let suffix = naming::normalize_extension(&self.file_extension);
        let without_ext = if !suffix.is_empty() && self.file_name.ends_with(&suffix) {
            &self.file_name[..self.file_name.len() - suffix.len()]
        } else {
            naming::strip_extension(&self.file_name)
        };
        naming::strip_timestamp_suffix(without_ext).to_string()
    }
}

/// A ROM file found on the device, with the save state attached during a pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalRomFile {
    /// Platform the ROM belongs to
    pub platform_key: String,
    /// File name including extension
    pub file_name: String,
    /// Absolute path of the ROM
    pub file_path: PathBuf,
    /// Remote ROM id once identity is resolved
    pub resolved_remote_id: Option<u64>,
    /// Remote ROM name once identity is resolved
    pub resolved_remote_name: Option<String>,
    /// Local save sharing this ROM's base name
    pub local_save: Option<LocalSave>,
    /// Remote saves attached to the resolved remote ROM
    pub remote_saves: Vec<RemoteSave>,
    /// Set when identity is awaiting user confirmation of a fuzzy match
    pub pending_fuzzy_match: bool,
}

impl LocalRomFile {
    /// Create an unresolved ROM record for a path
    pub fn new(platform_key: impl Into<String>, file_path: PathBuf) -> Self {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            platform_key: platform_key.into(),
            file_name,
            file_path,
            resolved_remote_id: None,
            resolved_remote_name: None,
            local_save: None,
            remote_saves: Vec::new(),
            pending_fuzzy_match: false,
        }
    }

    /// File name without its extension
    pub fn base_name(&self) -> &str {
        naming::strip_extension(&self.file_name)
    }

    /// Whether a remote identity has been resolved
    pub fn is_resolved(&self) -> bool {
        self.resolved_remote_id.is_some()
    }
}

/// What to do with one game's save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    /// Push the local save to the library
    Upload,
    /// Pull the remote save onto the device
    Download,
    /// Both sides agree
    Skip,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Upload => write!(f, "upload"),
            SyncAction::Download => write!(f, "download"),
            SyncAction::Skip => write!(f, "skip"),
        }
    }
}

/// One planned save transfer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveSync {
    /// Remote ROM id (`0` means unresolved)
    pub remote_rom_id: u64,
    /// Remote ROM name
    pub remote_rom_name: String,
    /// Platform the game belongs to
    pub platform_key: String,
    /// Base name of the local ROM, used to name downloaded files
    pub game_base_name: String,
    /// Local save, if any
    pub local: Option<LocalSave>,
    /// Latest matching remote save, absent for upload-only plans
    pub remote: Option<RemoteSave>,
    /// Chosen action
    pub action: SyncAction,
    /// Save folder chosen by the user (or auto-selected) for a fresh download
    pub selected_emulator_dir: Option<String>,
}

/// Outcome of executing one [`SaveSync`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncResult {
    /// Game display name (base name of the ROM)
    pub game_name: String,
    /// Action that was attempted
    pub action: SyncAction,
    /// Whether the action succeeded
    pub success: bool,
    /// Failure description
    pub error_message: Option<String>,
    /// Local file the action produced or touched
    pub resulting_file_path: Option<PathBuf>,
}

impl SyncResult {
    /// Successful outcome
    pub fn succeeded(game_name: impl Into<String>, action: SyncAction, path: Option<PathBuf>) -> Self {
        Self {
            game_name: game_name.into(),
            action,
            success: true,
            error_message: None,
            resulting_file_path: path,
        }
    }

    /// Failed outcome
    pub fn failed(game_name: impl Into<String>, action: SyncAction, message: impl Into<String>) -> Self {
        Self {
            game_name: game_name.into(),
            action,
            success: false,
            error_message: Some(message.into()),
            resulting_file_path: None,
        }
    }
}

/// A local save whose ROM could not be identified remotely
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnmatchedSave {
    /// Path of the orphaned save
    pub save_path: PathBuf,
    /// Path of the ROM that was not identified
    pub rom_path: PathBuf,
    /// ROM file name
    pub rom_name: String,
    /// Platform key
    pub platform_key: String,
}

/// A fuzzy title match awaiting user confirmation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingFuzzyMatch {
    /// Local ROM file name (cache key)
    pub local_file_name: String,
    /// Local ROM path
    pub local_path: PathBuf,
    /// Local save path
    pub save_path: PathBuf,
    /// Platform key
    pub platform_key: String,
    /// Best candidate remote ROM id
    pub candidate_remote_id: u64,
    /// Best candidate remote ROM name
    pub candidate_name: String,
    /// Similarity in `[0, 1]`
    pub similarity_score: f64,
}

/// Remote platform reported by the library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    /// Remote platform id
    pub id: u64,
    /// Filesystem slug, used as the local platform key
    pub slug: String,
    /// Display name
    pub name: String,
}

/// Remote ROM reported by the library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogRom {
    /// Remote ROM id
    pub id: u64,
    /// Display name
    pub name: String,
    /// File name as stored remotely
    #[serde(default)]
    pub file_name: String,
}

/// Checksum used for a catalog lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RomChecksum {
    /// 8 lowercase hex digits
    Crc32(String),
    /// 40 lowercase hex digits
    Sha1(String),
}

impl fmt::Display for RomChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RomChecksum::Crc32(h) => write!(f, "crc32:{}", h),
            RomChecksum::Sha1(h) => write!(f, "sha1:{}", h),
        }
    }
}

/// A platform-level failure captured in a plan or report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformFailure {
    /// Platform key, or the directory when no platform applies
    pub platform: String,
    /// Error description
    pub message: String,
}

/// Everything a pass decided before touching any file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Transfers to execute, in deterministic order
    pub syncs: Vec<SaveSync>,
    /// Saves whose ROM could not be identified
    pub unmatched: Vec<UnmatchedSave>,
    /// Fuzzy matches awaiting confirmation
    pub pending: Vec<PendingFuzzyMatch>,
    /// Platforms that could not be scanned
    pub scan_errors: Vec<PlatformFailure>,
    /// Platforms whose remote saves could not be fetched
    pub fetch_errors: Vec<PlatformFailure>,
}

impl SyncPlan {
    /// Syncs that need a folder choice before they can run
    pub fn needing_emulator_selection(&self) -> impl Iterator<Item = &SaveSync> {
        self.syncs.iter().filter(|s| {
            s.action == SyncAction::Download && s.local.is_none() && s.selected_emulator_dir.is_none()
        })
    }
}

/// Phase of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassPhase {
    /// No pass running
    Idle,
    /// Walking local ROM and save folders
    Scanning,
    /// Fetching remote saves per platform
    Fetching,
    /// Resolving ROM identities
    Resolving,
    /// Deciding per-game actions
    Planning,
    /// Running transfers
    Executing,
    /// Assembling the report
    Reporting,
}

impl fmt::Display for PassPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassPhase::Idle => "idle",
            PassPhase::Scanning => "scanning",
            PassPhase::Fetching => "fetching",
            PassPhase::Resolving => "resolving",
            PassPhase::Planning => "planning",
            PassPhase::Executing => "executing",
            PassPhase::Reporting => "reporting",
        };
        write!(f, "{}", name)
    }
}

/// Progress callback for long-running phases
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Phase being reported
    pub phase: PassPhase,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far
    pub processed: usize,
    /// Total items to process (if known)
    pub total: Option<usize>,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some((self.processed as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}

/// Result of a complete reconciliation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Unique id of the pass
    pub pass_id: Uuid,
    /// When the pass started
    pub started_at: DateTime<Utc>,
    /// When the pass finished
    pub finished_at: DateTime<Utc>,
    /// One result per executed sync, in plan order
    pub results: Vec<SyncResult>,
    /// Saves whose ROM could not be identified
    pub unmatched: Vec<UnmatchedSave>,
    /// Fuzzy matches awaiting confirmation
    pub pending: Vec<PendingFuzzyMatch>,
    /// Platforms that could not be scanned
    pub scan_errors: Vec<PlatformFailure>,
    /// Platforms whose remote saves could not be fetched
    pub fetch_errors: Vec<PlatformFailure>,
}

impl ReconcileReport {
    fn count(&self, action: SyncAction) -> usize {
        self.results
            .iter()
            .filter(|r| r.success && r.action == action)
            .count()
    }

    /// Successful uploads
    pub fn uploaded(&self) -> usize {
        self.count(SyncAction::Upload)
    }

    /// Successful downloads
    pub fn downloaded(&self) -> usize {
        self.count(SyncAction::Download)
    }

    /// Failed syncs
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    /// True when nothing was transferred and nothing failed
    pub fn is_up_to_date(&self) -> bool {
        self.uploaded() == 0 && self.downloaded() == 0 && self.failed() == 0
    }

    /// Wall-clock duration of the pass
    pub fn duration(&self) -> std::time::Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}
