//! Remote game library interface
//!
//! The engine talks to the remote library only through [`RemoteCatalog`].
//! Implementations own transport and authentication; the engine only needs
//! platforms, saves, checksum lookups and save transfers. Every method is
//! blocking and must be callable from several worker threads at once.
//!
//! [`TimedCatalog`] wraps any catalog and bounds each call by the configured
//! API timeout, turning slow calls into [`SyncError::Timeout`]. Uploads are
//! the exception: an upload past the timeout is waited out, because its
//! staged file must outlive it and a late success still changes the remote.

use crate::error::{Result, SyncError};
use crate::types::{CatalogRom, Platform, RemoteSave, RomChecksum};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

/// Remote library of platforms, ROMs and saves
pub trait RemoteCatalog: Send + Sync {
    /// All platforms known to the library
    fn get_platforms(&self) -> Result<Vec<Platform>>;

    /// All saves stored for a platform
    fn get_saves_for_platform(&self, platform_id: u64) -> Result<Vec<RemoteSave>>;

    /// ROM with a matching checksum, `Ok(None)` when there is none
    fn get_rom_by_checksum(&self, checksum: &RomChecksum) -> Result<Option<CatalogRom>>;

    /// Raw content of a save
    fn download_save(&self, download_path: &str) -> Result<Vec<u8>>;

    /// Upload a save file for a ROM and return the stored record
    fn upload_save(&self, rom_id: u64, file_path: &Path, emulator_tag: &str) -> Result<RemoteSave>;

    /// ROM titles for a platform, used as fuzzy-match candidates
    ///
    /// Catalogs that cannot list ROMs return nothing and fuzzy matching
    /// falls back to whatever titles are already cached.
    fn get_roms_for_platform(&self, _platform_id: u64) -> Result<Vec<CatalogRom>> {
        Ok(Vec::new())
    }
}

impl<T: RemoteCatalog + ?Sized> RemoteCatalog for Arc<T> {
    fn get_platforms(&self) -> Result<Vec<Platform>> {
        (**self).get_platforms()
    }

    fn get_saves_for_platform(&self, platform_id: u64) -> Result<Vec<RemoteSave>> {
        (**self).get_saves_for_platform(platform_id)
    }

    fn get_rom_by_checksum(&self, checksum: &RomChecksum) -> Result<Option<CatalogRom>> {
        (**self).get_rom_by_checksum(checksum)
    }

    fn download_save(&self, download_path: &str) -> Result<Vec<u8>> {
        (**self).download_save(download_path)
    }

    fn upload_save(&self, rom_id: u64, file_path: &Path, emulator_tag: &str) -> Result<RemoteSave> {
        (**self).upload_save(rom_id, file_path, emulator_tag)
    }

    fn get_roms_for_platform(&self, platform_id: u64) -> Result<Vec<CatalogRom>> {
        (**self).get_roms_for_platform(platform_id)
    }
}

/// Catalog wrapper that bounds every call by a timeout
///
/// Each call runs as a blocking task on a small tokio runtime owned by the
/// wrapper, raced against `tokio::time::timeout`. A timed-out read is
/// abandoned and its result discarded. A timed-out upload is joined before
/// returning: a late success is passed through so the caller can record the
/// new remote state, a late failure becomes [`SyncError::Timeout`].
pub struct TimedCatalog {
    inner: Arc<dyn RemoteCatalog>,
    timeout: Duration,
    runtime: Option<Runtime>,
}

impl TimedCatalog {
    /// Wrap a catalog
    ///
    /// # Errors
    ///
    /// - [`SyncError::ThreadPool`] if the runtime cannot be started
    pub fn new(inner: Arc<dyn RemoteCatalog>, timeout: Duration) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("savesync-catalog")
            .enable_time()
            .build()
            .map_err(|e| SyncError::ThreadPool(format!("catalog runtime: {}", e)))?;

        Ok(Self {
            inner,
            timeout,
            runtime: Some(runtime),
        })
    }

    /// Timeout applied to each call
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| SyncError::internal("catalog runtime already shut down"))
    }

    fn spawn<T, F>(&self, f: F) -> Result<JoinHandle<Result<T>>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RemoteCatalog) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        Ok(self.runtime()?.spawn_blocking(move || f(inner.as_ref())))
    }

    fn call<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RemoteCatalog) -> Result<T> + Send + 'static,
    {
        let task = self.spawn(f)?;

        self.runtime()?.block_on(async {
            match tokio::time::timeout(self.timeout, task).await {
                Ok(joined) => settle(operation, joined),
                Err(_) => {
                    warn!("Catalog call '{}' timed out after {:?}", operation, self.timeout);
                    Err(SyncError::Timeout(self.timeout))
                }
            }
        })
    }
}

/// Flatten a joined task, turning a panic into [`SyncError::Internal`]
fn settle<T>(operation: &str, joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    joined.map_err(|e| SyncError::internal(format!("catalog call '{}' failed: {}", operation, e)))?
}

impl Drop for TimedCatalog {
    fn drop(&mut self) {
        // Abandoned reads must not hold up shutdown
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl RemoteCatalog for TimedCatalog {
    fn get_platforms(&self) -> Result<Vec<Platform>> {
        self.call("platforms", |c| c.get_platforms())
    }

    fn get_saves_for_platform(&self, platform_id: u64) -> Result<Vec<RemoteSave>> {
        self.call("saves", move |c| c.get_saves_for_platform(platform_id))
    }

    fn get_rom_by_checksum(&self, checksum: &RomChecksum) -> Result<Option<CatalogRom>> {
        let checksum = checksum.clone();
        self.call("checksum", move |c| c.get_rom_by_checksum(&checksum))
    }

    fn download_save(&self, download_path: &str) -> Result<Vec<u8>> {
        let download_path = download_path.to_string();
        self.call("download", move |c| c.download_save(&download_path))
    }

    fn upload_save(&self, rom_id: u64, file_path: &Path, emulator_tag: &str) -> Result<RemoteSave> {
        let file_path = file_path.to_path_buf();
        let emulator_tag = emulator_tag.to_string();
        let mut task = self.spawn(move |c| c.upload_save(rom_id, &file_path, &emulator_tag))?;

        self.runtime()?.block_on(async {
            match tokio::time::timeout(self.timeout, &mut task).await {
                Ok(joined) => settle("upload", joined),
                Err(_) => {
                    warn!(
                        "Upload to ROM {} exceeded {:?}, waiting for it to settle",
                        rom_id, self.timeout
                    );
                    match settle("upload", task.await) {
                        Ok(save) => {
                            debug!("Late upload to ROM {} completed as save {}", rom_id, save.id);
                            Ok(save)
                        }
                        Err(e) => {
                            debug!("Late upload to ROM {} failed: {}", rom_id, e);
                            Err(SyncError::Timeout(self.timeout))
                        }
                    }
                }
            }
        })
    }

    fn get_roms_for_platform(&self, platform_id: u64) -> Result<Vec<CatalogRom>> {
        self.call("roms", move |c| c.get_roms_for_platform(platform_id))
    }
}
