//! Transfer execution
//!
//! [`SyncExecutor`] carries out one [`SaveSync`] at a time and never raises:
//! every failure is folded into the returned [`SyncResult`].
//!
//! ## Downloads
//!
//! 1. Any existing local save is first copied to
//!    `<save dir>/.backup/<base> [YYYY-MM-DD HH-MM-SS]<ext>`.
//! 2. The remote bytes are written atomically to
//!    `<save dir>/<game base name><remote ext>`, where the save dir is the
//!    local save's folder or, for a first download, the chosen emulator
//!    folder.
//! 3. The file's mtime is set to the remote `updated_at`, so the next pass
//!    sees both sides in agreement.
//! 4. The old local file is removed when it lived at a different path.
//!
//! ## Uploads
//!
//! The local save is copied to the uploads staging folder as
//! `<game base name> [YYYY-MM-DD HH-MM-SS-mmm]<ext>`, uploaded with the save
//! folder name as the emulator tag, and the local mtime is then set to the
//! `updated_at` the library reports. The staged copy is always removed.

use crate::catalog::RemoteCatalog;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::naming;
use crate::platform::PlatformDirectoryMap;
use crate::types::{LocalSave, SaveSync, SyncAction, SyncResult};
use crate::utils;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Folder name for backups, inside each save folder
pub const BACKUP_DIR: &str = ".backup";

/// Executes planned syncs against the filesystem and the catalog
pub struct SyncExecutor<'a> {
    catalog: &'a dyn RemoteCatalog,
    config: Option<&'a SyncConfig>,
    directory_map: &'a dyn PlatformDirectoryMap,
}

impl<'a> SyncExecutor<'a> {
    /// Create an executor
    ///
    /// Without a configuration every transfer fails with
    /// [`SyncError::Transfer`].
    pub fn new(
        catalog: &'a dyn RemoteCatalog,
        config: Option<&'a SyncConfig>,
        directory_map: &'a dyn PlatformDirectoryMap,
    ) -> Self {
        Self {
            catalog,
            config,
            directory_map,
        }
    }

    /// Execute one sync and report the outcome
    #[instrument(skip(self, sync), fields(game = %sync.game_base_name, action = %sync.action))]
    pub fn execute(&self, sync: &SaveSync) -> SyncResult {
        let game = sync.game_base_name.clone();

        let outcome = match sync.action {
            SyncAction::Skip => {
                return SyncResult::succeeded(game, SyncAction::Skip, sync.local.as_ref().map(|l| l.path.clone()));
            }
            SyncAction::Download => self.download(sync),
            SyncAction::Upload => self.upload(sync),
        };

        match outcome {
            Ok(path) => {
                info!("{} {} -> {:?}", sync.action, game, path);
                SyncResult::succeeded(game, sync.action, Some(path))
            }
            Err(e) => {
                warn!("{} of {} failed: {}", sync.action, game, e);
                SyncResult::failed(game, sync.action, e.to_string())
            }
        }
    }

    fn require_config(&self) -> Result<&'a SyncConfig> {
        self.config
            .ok_or_else(|| SyncError::transfer("no configuration available for transfer"))
    }

    /// Download the remote save, backing up any local copy first
    ///
    /// # Errors
    ///
    /// - [`SyncError::Transfer`] without configuration or a remote save
    /// - [`SyncError::Orphan`] when the remote ROM is unresolved
    /// - [`SyncError::Io`] on backup, write or timestamp failures
    /// - any catalog error from the download itself
    pub fn download(&self, sync: &SaveSync) -> Result<PathBuf> {
        let config = self.require_config()?;
        if sync.remote_rom_id == 0 {
            return Err(SyncError::Orphan(sync.game_base_name.clone()));
        }
        let remote = sync
            .remote
            .as_ref()
            .ok_or_else(|| SyncError::transfer("no remote save to download"))?;

        if let Some(local) = sync.local.as_ref() {
            let backup = backup_save(local)?;
            debug!("Backed up {:?} to {:?}", local.path, backup);
        }

        let bytes = self.catalog.download_save(&remote.download_path)?;

        let dir = match sync.local.as_ref() {
            Some(local) => local.directory().to_path_buf(),
            None => resolve_save_directory(
                config,
                self.directory_map,
                &sync.platform_key,
                sync.selected_emulator_dir.as_deref(),
                remote.emulator_tag.as_deref(),
            )?,
        };

        let destination = dir.join(format!(
            "{}{}",
            sync.game_base_name,
            naming::normalize_extension(&remote.file_extension)
        ));

        utils::atomic_write(&destination, &bytes)?;
        utils::set_modified_time(&destination, &remote.updated_at)?;

        if let Some(local) = sync.local.as_ref() {
            if local.path != destination && local.path.exists() {
                fs::remove_file(&local.path)?;
                debug!("Removed superseded save {:?}", local.path);
            }
        }

        Ok(destination)
    }

    /// Stage and upload the local save
    ///
    /// # Errors
    ///
    /// - [`SyncError::Transfer`] without a local save or configuration
    /// - [`SyncError::Orphan`] when the remote ROM is unresolved
    /// - [`SyncError::Io`] on staging or timestamp failures
    /// - any catalog error from the upload itself
    pub fn upload(&self, sync: &SaveSync) -> Result<PathBuf> {
        let local = sync
            .local
            .as_ref()
            .ok_or_else(|| SyncError::transfer("no local save to upload"))?;
        let config = self.require_config()?;
        if sync.remote_rom_id == 0 {
            return Err(SyncError::Orphan(sync.game_base_name.clone()));
        }

        let modified = utils::modified_time(&local.path)?;
        let file_name = local.file_name();
        let staged_name = format!(
            "{} {}{}",
            sync.game_base_name,
            naming::upload_timestamp(&modified),
            naming::extension(&file_name)
        );

        fs::create_dir_all(&config.uploads_dir)?;
        let staged = config.uploads_dir.join(staged_name);
        fs::copy(&local.path, &staged)?;

        let uploaded = self
            .catalog
            .upload_save(sync.remote_rom_id, &staged, &local.emulator_tag());

        if let Err(e) = fs::remove_file(&staged) {
            warn!("Failed to remove staged upload {:?}: {}", staged, e);
        }

        let remote = uploaded?;
        utils::set_modified_time(&local.path, &remote.updated_at)?;

        Ok(local.path.clone())
    }
}

/// Copy a save into its folder's `.backup` directory
///
/// The copy is named after the save's modification time.
pub fn backup_save(save: &LocalSave) -> Result<PathBuf> {
    let backup_dir = save.directory().join(BACKUP_DIR);
    fs::create_dir_all(&backup_dir)?;

    let destination = backup_dir.join(naming::backup_file_name(
        &save.file_name(),
        &save.last_modified,
    ));
    fs::copy(&save.path, &destination)?;

    Ok(destination)
}

/// Pick (and create) the folder a first download should land in
///
/// Order: the selected emulator folder, the configured save-folder override,
/// a platform save folder whose name contains the remote emulator tag, and
/// finally the platform's first save folder.
///
/// # Errors
///
/// - [`SyncError::Transfer`] when the platform has no save folder at all
/// - [`SyncError::Io`] if the folder cannot be created
pub fn resolve_save_directory(
    config: &SyncConfig,
    directory_map: &dyn PlatformDirectoryMap,
    platform_key: &str,
    selected: Option<&str>,
    emulator_tag: Option<&str>,
) -> Result<PathBuf> {
    let folders = directory_map.save_directories(config.firmware, platform_key);

    let by_tag = || {
        let tag = emulator_tag.filter(|t| !t.is_empty())?.to_lowercase();
        folders
            .iter()
            .find(|f| f.to_lowercase().contains(&tag))
            .map(|f| config.save_root.join(f))
    };

    let dir = selected
        .filter(|s| !s.is_empty())
        .map(|s| config.save_root.join(s))
        .or_else(|| config.save_directory_override(platform_key))
        .or_else(by_tag)
        .or_else(|| folders.first().map(|f| config.save_root.join(f)))
        .ok_or_else(|| {
            SyncError::transfer(format!("no save folder known for platform '{}'", platform_key))
        })?;

    fs::create_dir_all(&dir)?;
    Ok(dir)
}
