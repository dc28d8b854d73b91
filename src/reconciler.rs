//! Reconciliation pass orchestration
//!
//! A [`Reconciler`] runs one pass through its phases:
//!
//! 1. **Scanning**: walk the device for ROMs and attach local saves.
//! 2. **Fetching**: list remote platforms, then fetch every scanned
//!    platform's saves in parallel. A platform that fails is recorded and the
//!    others carry on; only an unavailable platform list ends the pass.
//! 3. **Resolving**: link each ROM to its remote identity.
//! 4. **Planning**: decide each game's action, deduplicate, and pick save
//!    folders for first downloads.
//! 5. **Executing**: run the transfers on a bounded pool.
//! 6. **Reporting**: assemble the [`ReconcileReport`].
//!
//! [`Reconciler::plan`] stops after planning so a front end can show pending
//! fuzzy matches and folder choices before anything is written;
//! [`Reconciler::execute`] runs a plan; [`Reconciler::run_pass`] does both.
//!
//! ## Example
//!
//! ```rust,no_run
//! use savesync::{ReconcilerBuilder, RemoteCatalog, StaticDirectoryMap};
//! use std::sync::Arc;
//!
//! # fn example(catalog: Arc<dyn RemoteCatalog>) -> savesync::Result<()> {
//! let reconciler = ReconcilerBuilder::new()
//!     .rom_root("/mnt/SDCARD/Roms")
//!     .save_root("/mnt/SDCARD/Saves")
//!     .cache_path("/mnt/SDCARD/.savesync/cache.json")
//!     .build(catalog, Arc::new(StaticDirectoryMap::new()))?;
//!
//! let report = reconciler.run_pass()?;
//! println!("{} uploaded, {} downloaded", report.uploaded(), report.downloaded());
//! # Ok(())
//! # }
//! ```

use crate::cache::IdentityCache;
use crate::catalog::{RemoteCatalog, TimedCatalog};
use crate::config::{DirectoryMapping, SyncConfig};
use crate::error::{Result, SyncError};
use crate::executor::SyncExecutor;
use crate::parallel;
use crate::planner;
use crate::platform::{Firmware, PlatformDirectoryMap};
use crate::resolver::{IdentityResolver, Resolution, ResolverCounters};
use crate::scanner::{self, DirectoryScanner, EmulatorDirectory};
use crate::types::{
    LocalRomFile, PassPhase, PendingFuzzyMatch, PlatformFailure, ProgressCallback, ProgressInfo,
    ReconcileReport, RemoteSave, SaveSync, SyncAction, SyncPlan, SyncResult,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Save reconciliation engine
pub struct Reconciler {
    config: SyncConfig,
    catalog: Arc<dyn RemoteCatalog>,
    directory_map: Arc<dyn PlatformDirectoryMap>,
    cache: RwLock<Arc<IdentityCache>>,
    phase: RwLock<PassPhase>,
    progress: Option<ProgressCallback>,
    emulator_selections: Mutex<HashMap<String, String>>,
    last_resolver_stats: Mutex<ResolverCounters>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("phase", &*self.phase.read())
            .field("cached_identities", &self.cache.read().len())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Reconciler {
    /// Configuration in use
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Phase of the pass currently running
    pub fn current_phase(&self) -> PassPhase {
        *self.phase.read()
    }

    /// Identity cache in use
    pub fn cache(&self) -> Arc<IdentityCache> {
        Arc::clone(&self.cache.read())
    }

    /// Resolver counters from the most recent plan
    pub fn last_resolver_stats(&self) -> ResolverCounters {
        *self.last_resolver_stats.lock()
    }

    fn set_phase(&self, phase: PassPhase) {
        debug!("Entering phase {}", phase);
        *self.phase.write() = phase;
    }

    fn report_progress(&self, phase: PassPhase, item: Option<String>, processed: usize, total: usize) {
        if let Some(callback) = &self.progress {
            callback(ProgressInfo {
                phase,
                current_item: item,
                processed,
                total: Some(total),
            });
        }
    }

    /// Run a complete pass: plan, then execute
    ///
    /// # Errors
    ///
    /// - [`SyncError::NoPlatforms`] when the remote platform list is unavailable
    /// - [`SyncError::ThreadPool`] if a worker pool cannot be created
    #[instrument(skip(self))]
    pub fn run_pass(&self) -> Result<ReconcileReport> {
        let started_at = Utc::now();
        let plan = self.plan()?;
        let mut report = self.execute(plan)?;
        report.started_at = started_at;
        Ok(report)
    }

    /// Scan, fetch, resolve and plan without touching any save
    ///
    /// # Errors
    ///
    /// - [`SyncError::NoPlatforms`] when the remote platform list is unavailable
    /// - [`SyncError::ThreadPool`] if a worker pool cannot be created
    pub fn plan(&self) -> Result<SyncPlan> {
        let result = self.plan_inner();
        if result.is_err() {
            self.set_phase(PassPhase::Idle);
        }
        result
    }

    fn plan_inner(&self) -> Result<SyncPlan> {
        let cache = self.reload_cache();

        self.set_phase(PassPhase::Scanning);
        let scan = DirectoryScanner::new(&self.config, self.directory_map.as_ref()).scan()?;

        self.set_phase(PassPhase::Fetching);
        let (roms, saves_by_rom, fetch_errors) = self.fetch_remote(&cache, scan.roms)?;

        self.set_phase(PassPhase::Resolving);
        let (roms, unmatched, pending) = self.resolve(&cache, roms, &saves_by_rom)?;

        self.persist_cache(&cache);

        self.set_phase(PassPhase::Planning);
        // Remote state of a failed platform is unknown, so nothing is planned for it
        let unreachable: HashSet<&str> = fetch_errors.iter().map(|f| f.platform.as_str()).collect();
        if !unreachable.is_empty() {
            debug!("Not planning platforms with failed fetches: {:?}", unreachable);
        }
        let mut syncs = planner::plan_syncs(
            roms.iter()
                .filter(|rom| !unreachable.contains(rom.platform_key.as_str())),
        );
        for sync in syncs.iter_mut() {
            self.apply_emulator_selection(sync);
        }

        info!(
            "Planned {} syncs ({} unmatched, {} pending, {} scan errors, {} fetch errors)",
            syncs.len(),
            unmatched.len(),
            pending.len(),
            scan.errors.len(),
            fetch_errors.len()
        );

        Ok(SyncPlan {
            syncs,
            unmatched,
            pending,
            scan_errors: scan.errors,
            fetch_errors,
        })
    }

    fn reload_cache(&self) -> Arc<IdentityCache> {
        if let Some(path) = self.config.cache_path.as_deref() {
            *self.cache.write() = Arc::new(IdentityCache::load(path));
        }
        self.cache()
    }

    fn persist_cache(&self, cache: &IdentityCache) {
        if let Some(path) = self.config.cache_path.as_deref() {
            if let Err(e) = cache.save(path) {
                warn!("Failed to persist identity cache to {:?}: {}", path, e);
            }
        }
    }

    /// List platforms and fetch remote saves for every scanned platform
    #[allow(clippy::type_complexity)]
    fn fetch_remote(
        &self,
        cache: &IdentityCache,
        scanned: std::collections::BTreeMap<String, Vec<LocalRomFile>>,
    ) -> Result<(Vec<LocalRomFile>, HashMap<u64, Vec<RemoteSave>>, Vec<PlatformFailure>)> {
        let platforms = self
            .catalog
            .get_platforms()
            .map_err(|e| SyncError::NoPlatforms(e.to_string()))?;
        if platforms.is_empty() {
            return Err(SyncError::NoPlatforms(
                "the library reported no platforms".to_string(),
            ));
        }

        let remote_ids: HashMap<&str, u64> =
            platforms.iter().map(|p| (p.slug.as_str(), p.id)).collect();

        let mut roms = Vec::new();
        let mut keys = Vec::new();
        for (key, platform_roms) in scanned {
            match remote_ids.get(key.as_str()) {
                Some(id) => {
                    keys.push((key, *id));
                    roms.extend(platform_roms);
                }
                None => debug!("Platform {} is not in the library, skipping", key),
            }
        }

        let total = keys.len();
        let done = AtomicUsize::new(0);
        let catalog = self.catalog.as_ref();

        let outcomes = parallel::map_keys(keys, self.config.parallel_workers, |(key, id)| {
            let saves = catalog
                .get_saves_for_platform(*id)
                .map_err(|e| SyncError::fetch(key.as_str(), e.to_string()))?;

            if !cache.has_titles(key) {
                match catalog.get_roms_for_platform(*id) {
                    Ok(titles) if !titles.is_empty() => cache.set_titles(key, titles),
                    Ok(_) => {}
                    Err(e) => warn!("Cannot list titles for {}: {}", key, e),
                }
            }

            let processed = done.fetch_add(1, Ordering::Relaxed) + 1;
            self.report_progress(PassPhase::Fetching, Some(key.clone()), processed, total);
            Ok(saves)
        })?;

        let (fetched, failed) = parallel::partition(outcomes);

        let mut saves_by_rom: HashMap<u64, Vec<RemoteSave>> = HashMap::new();
        for ((key, _), saves) in fetched {
            debug!("Fetched {} remote saves for {}", saves.len(), key);
            for save in saves {
                saves_by_rom.entry(save.remote_rom_id).or_default().push(save);
            }
        }

        let fetch_errors: Vec<PlatformFailure> = failed
            .into_iter()
            .map(|((key, _), e)| {
                warn!("{}", e);
                PlatformFailure {
                    platform: key,
                    message: e.to_string(),
                }
            })
            .collect();

        Ok((roms, saves_by_rom, fetch_errors))
    }

    /// Resolve every ROM and attach remote saves to the resolved ones
    #[allow(clippy::type_complexity)]
    fn resolve(
        &self,
        cache: &IdentityCache,
        mut roms: Vec<LocalRomFile>,
        saves_by_rom: &HashMap<u64, Vec<RemoteSave>>,
    ) -> Result<(Vec<LocalRomFile>, Vec<crate::types::UnmatchedSave>, Vec<PendingFuzzyMatch>)> {
        let resolver = IdentityResolver::new(self.catalog.as_ref(), cache)
            .with_fuzzy_threshold(self.config.fuzzy_threshold)
            .with_lookup_cooldown(self.config.lookup_cooldown);

        let total = roms.len();
        let done = AtomicUsize::new(0);
        let pool = parallel::worker_pool(self.config.parallel_workers)?;

        let resolutions: Vec<Resolution> = pool.install(|| {
            roms.par_iter_mut()
                .map(|rom| {
                    let resolution = resolver.resolve(rom);
                    match &resolution {
                        Resolution::Resolved {
                            remote_id,
                            remote_name,
                            ..
                        } => {
                            rom.resolved_remote_id = Some(*remote_id);
                            rom.resolved_remote_name = Some(remote_name.clone());
                            rom.remote_saves =
                                saves_by_rom.get(remote_id).cloned().unwrap_or_default();
                        }
                        Resolution::Pending(_) => rom.pending_fuzzy_match = true,
                        Resolution::Unmatched(_) | Resolution::Skipped => {}
                    }

                    let processed = done.fetch_add(1, Ordering::Relaxed) + 1;
                    self.report_progress(
                        PassPhase::Resolving,
                        Some(rom.file_name.clone()),
                        processed,
                        total,
                    );
                    resolution
                })
                .collect()
        });

        let mut unmatched = Vec::new();
        let mut pending = Vec::new();
        for resolution in resolutions {
            match resolution {
                Resolution::Unmatched(save) => unmatched.push(save),
                Resolution::Pending(candidate) => pending.push(candidate),
                _ => {}
            }
        }

        let stats = resolver.stats();
        debug!("Resolver stats: {:?}", stats);
        *self.last_resolver_stats.lock() = stats;

        Ok((roms, unmatched, pending))
    }

    /// Execute a plan and build the report
    ///
    /// Every sync produces exactly one [`SyncResult`], in plan order.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ThreadPool`] if the worker pool cannot be created
    pub fn execute(&self, plan: SyncPlan) -> Result<ReconcileReport> {
        let started_at = Utc::now();
        self.set_phase(PassPhase::Executing);

        let executor = SyncExecutor::new(
            self.catalog.as_ref(),
            Some(&self.config),
            self.directory_map.as_ref(),
        );
        let total = plan.syncs.len();
        let done = AtomicUsize::new(0);

        let pool = match parallel::worker_pool(self.config.parallel_workers) {
            Ok(pool) => pool,
            Err(e) => {
                self.set_phase(PassPhase::Idle);
                return Err(e);
            }
        };

        let results: Vec<SyncResult> = pool.install(|| {
            plan.syncs
                .par_iter()
                .map(|sync| {
                    let result = executor.execute(sync);
                    let processed = done.fetch_add(1, Ordering::Relaxed) + 1;
                    self.report_progress(
                        PassPhase::Executing,
                        Some(sync.game_base_name.clone()),
                        processed,
                        total,
                    );
                    result
                })
                .collect()
        });

        self.set_phase(PassPhase::Reporting);
        let report = ReconcileReport {
            pass_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            results,
            unmatched: plan.unmatched,
            pending: plan.pending,
            scan_errors: plan.scan_errors,
            fetch_errors: plan.fetch_errors,
        };

        info!(
            "Pass {} finished: {} uploaded, {} downloaded, {} failed",
            report.pass_id,
            report.uploaded(),
            report.downloaded(),
            report.failed()
        );

        self.set_phase(PassPhase::Idle);
        Ok(report)
    }

    /// Accept a fuzzy candidate: cache the identity and clear any cooldown
    ///
    /// The cache is persisted immediately when a cache path is configured,
    /// so the next pass resolves the ROM from the cache.
    pub fn confirm_fuzzy_match(&self, candidate: &PendingFuzzyMatch) -> Result<()> {
        let cache = self.cache();
        cache.insert(
            &candidate.platform_key,
            &candidate.local_file_name,
            candidate.candidate_remote_id,
            &candidate.candidate_name,
        );
        cache.clear_failed_lookup(&candidate.platform_key, &candidate.local_file_name);
        info!(
            "Confirmed {} as '{}'",
            candidate.local_file_name, candidate.candidate_name
        );
        self.save_cache(&cache)
    }

    /// Decline a fuzzy candidate: the ROM waits out the lookup cooldown
    pub fn reject_fuzzy_match(&self, candidate: &PendingFuzzyMatch) -> Result<()> {
        let cache = self.cache();
        cache.record_failed_lookup(&candidate.platform_key, &candidate.local_file_name, Utc::now());
        info!("Rejected fuzzy match for {}", candidate.local_file_name);
        self.save_cache(&cache)
    }

    fn save_cache(&self, cache: &IdentityCache) -> Result<()> {
        match self.config.cache_path.as_deref() {
            Some(path) => cache.save(path),
            None => Ok(()),
        }
    }

    /// Choose the save folder used for first downloads on a platform
    pub fn select_emulator(&self, platform_key: &str, directory_name: &str) {
        self.emulator_selections
            .lock()
            .insert(platform_key.to_string(), directory_name.to_string());
    }

    /// Candidate save folders for a platform
    pub fn emulator_directories(&self, platform_key: &str) -> Vec<EmulatorDirectory> {
        scanner::emulator_directories(&self.config, self.directory_map.as_ref(), platform_key)
    }

    /// Whether a sync needs the user to pick a save folder
    ///
    /// True for a first download on a platform with several save folders
    /// when no folder has been chosen.
    pub fn needs_emulator_selection(&self, sync: &SaveSync) -> bool {
        sync.action == SyncAction::Download
            && sync.local.is_none()
            && sync.selected_emulator_dir.is_none()
            && self
                .directory_map
                .save_directories(self.config.firmware, &sync.platform_key)
                .len()
                > 1
    }

    /// Fill in the save folder for a first download when it can be decided
    fn apply_emulator_selection(&self, sync: &mut SaveSync) {
        if sync.action != SyncAction::Download || sync.local.is_some() {
            return;
        }

        if let Some(choice) = self.emulator_selections.lock().get(&sync.platform_key) {
            sync.selected_emulator_dir = Some(choice.clone());
            return;
        }

        let mut with_saves = self
            .emulator_directories(&sync.platform_key)
            .into_iter()
            .filter(|d| d.has_saves);
        if let (Some(only), None) = (with_saves.next(), with_saves.next()) {
            debug!(
                "Auto-selected {} for {}",
                only.directory_name, sync.game_base_name
            );
            sync.selected_emulator_dir = Some(only.directory_name);
        }
    }
}

/// Builder for [`Reconciler`]
///
/// # Examples
///
/// ```rust
/// use savesync::{Firmware, ReconcilerBuilder};
/// use std::time::Duration;
///
/// let builder = ReconcilerBuilder::new()
///     .firmware(Firmware::Knulli)
///     .fuzzy_threshold(0.85)
///     .lookup_cooldown(Duration::from_secs(12 * 3600))
///     .parallel_workers(4);
/// ```
pub struct ReconcilerBuilder {
    config: SyncConfig,
    progress: Option<ProgressCallback>,
    emulator_selections: HashMap<String, String>,
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcilerBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
            progress: None,
            emulator_selections: HashMap::new(),
        }
    }

    /// Start from a complete configuration
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the device firmware
    pub fn firmware(mut self, firmware: Firmware) -> Self {
        self.config.firmware = firmware;
        self
    }

    /// Set the ROM root
    pub fn rom_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rom_root = path.into();
        self
    }

    /// Set the save root
    pub fn save_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.save_root = path.into();
        self
    }

    /// Override one platform's folders
    pub fn directory_mapping(mut self, platform_key: &str, mapping: DirectoryMapping) -> Self {
        self.config
            .directory_mappings
            .insert(platform_key.to_string(), mapping);
        self
    }

    /// Set the remote call timeout
    pub fn api_timeout(mut self, timeout: Duration) -> Self {
        self.config.api_timeout = timeout;
        self
    }

    /// Set the minimum fuzzy similarity
    pub fn fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.config.fuzzy_threshold = threshold;
        self
    }

    /// Set the failed-lookup cooldown
    pub fn lookup_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.lookup_cooldown = cooldown;
        self
    }

    /// Set number of parallel workers (minimum 1)
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.config.parallel_workers = count.max(1);
        self
    }

    /// Set the upload staging folder
    pub fn uploads_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.uploads_dir = path.into();
        self
    }

    /// Persist the identity cache at this path
    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_path = Some(path.into());
        self
    }

    /// Preselect the save folder used for first downloads on a platform
    pub fn emulator_selection(mut self, platform_key: &str, directory_name: &str) -> Self {
        self.emulator_selections
            .insert(platform_key.to_string(), directory_name.to_string());
        self
    }

    /// Receive progress updates during a pass
    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Build the reconciler
    ///
    /// The catalog is wrapped so every call honors `api_timeout`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidConfiguration`] if a setting is out of range
    /// - [`SyncError::ThreadPool`] if the catalog runtime cannot start
    pub fn build(
        self,
        catalog: Arc<dyn RemoteCatalog>,
        directory_map: Arc<dyn PlatformDirectoryMap>,
    ) -> Result<Reconciler> {
        self.config.validate()?;

        let cache = match self.config.cache_path.as_deref() {
            Some(path) => IdentityCache::load(path),
            None => IdentityCache::new(),
        };
        let catalog: Arc<dyn RemoteCatalog> =
            Arc::new(TimedCatalog::new(catalog, self.config.api_timeout)?);

        Ok(Reconciler {
            config: self.config,
            catalog,
            directory_map,
            cache: RwLock::new(Arc::new(cache)),
            phase: RwLock::new(PassPhase::Idle),
            progress: self.progress,
            emulator_selections: Mutex::new(self.emulator_selections),
            last_resolver_stats: Mutex::new(ResolverCounters::default()),
        })
    }
}
