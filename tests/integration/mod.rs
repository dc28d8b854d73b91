//! End-to-end reconciliation tests for savesync
//!
//! Drives full passes against a temporary device layout and an in-memory
//! game library, checking what ends up on disk and what reaches the library.

use ::savesync::*;
use chrono::{DateTime, TimeZone, Utc};
use filetime::FileTime;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// In-memory game library
pub struct MockCatalog {
    platforms: Vec<Platform>,
    saves: Mutex<HashMap<u64, Vec<RemoteSave>>>,
    titles: Mutex<HashMap<u64, Vec<CatalogRom>>>,
    checksums: Mutex<HashMap<RomChecksum, CatalogRom>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    uploaded: Mutex<Vec<(u64, String, String)>>,
    checksum_queries: AtomicUsize,
    downloads: AtomicUsize,
    next_id: AtomicU64,
}

impl MockCatalog {
    /// Library with the given `(id, slug)` platforms
    pub fn with_platforms(platforms: &[(u64, &str)]) -> Self {
        Self {
            platforms: platforms
                .iter()
                .map(|(id, slug)| Platform {
                    id: *id,
                    slug: slug.to_string(),
                    name: slug.to_uppercase(),
                })
                .collect(),
            saves: Mutex::new(HashMap::new()),
            titles: Mutex::new(HashMap::new()),
            checksums: Mutex::new(HashMap::new()),
            contents: Mutex::new(HashMap::new()),
            uploaded: Mutex::new(Vec::new()),
            checksum_queries: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            next_id: AtomicU64::new(500),
        }
    }

    pub fn add_save(&self, platform_id: u64, save: RemoteSave, content: &[u8]) {
        self.contents
            .lock()
            .insert(save.download_path.clone(), content.to_vec());
        self.saves.lock().entry(platform_id).or_default().push(save);
    }

    pub fn add_title(&self, platform_id: u64, id: u64, name: &str) {
        self.titles.lock().entry(platform_id).or_default().push(CatalogRom {
            id,
            name: name.to_string(),
            file_name: format!("{}.rom", name),
        });
    }

    pub fn add_checksum(&self, checksum: RomChecksum, id: u64, name: &str) {
        self.checksums.lock().insert(
            checksum,
            CatalogRom {
                id,
                name: name.to_string(),
                file_name: name.to_string(),
            },
        );
    }

    pub fn checksum_queries(&self) -> usize {
        self.checksum_queries.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// `(rom_id, file_name, emulator_tag)` of every upload
    pub fn uploads(&self) -> Vec<(u64, String, String)> {
        self.uploaded.lock().clone()
    }
}

impl RemoteCatalog for MockCatalog {
    fn get_platforms(&self) -> Result<Vec<Platform>> {
        Ok(self.platforms.clone())
    }

    fn get_saves_for_platform(&self, platform_id: u64) -> Result<Vec<RemoteSave>> {
        Ok(self.saves.lock().get(&platform_id).cloned().unwrap_or_default())
    }

    fn get_rom_by_checksum(&self, checksum: &RomChecksum) -> Result<Option<CatalogRom>> {
        self.checksum_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.checksums.lock().get(checksum).cloned())
    }

    fn download_save(&self, download_path: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.contents
            .lock()
            .get(download_path)
            .cloned()
            .ok_or_else(|| SyncError::remote(format!("not found: {}", download_path)))
    }

    fn upload_save(&self, rom_id: u64, file_path: &Path, emulator_tag: &str) -> Result<RemoteSave> {
        let content = fs::read(file_path)?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let download_path = format!("/saves/{}", id);

        self.contents.lock().insert(download_path.clone(), content);
        self.uploaded
            .lock()
            .push((rom_id, file_name.clone(), emulator_tag.to_string()));

        Ok(RemoteSave {
            id,
            remote_rom_id: rom_id,
            file_extension: naming::extension(&file_name).trim_start_matches('.').to_string(),
            file_name,
            download_path,
            updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            emulator_tag: Some(emulator_tag.to_string()),
        })
    }

    fn get_roms_for_platform(&self, platform_id: u64) -> Result<Vec<CatalogRom>> {
        Ok(self.titles.lock().get(&platform_id).cloned().unwrap_or_default())
    }
}

/// A temporary muOS-style device wired to a [`MockCatalog`]
pub struct SyncHarness {
    pub temp_dir: TempDir,
    pub catalog: Arc<MockCatalog>,
    pub reconciler: Reconciler,
}

impl SyncHarness {
    pub fn new(catalog: MockCatalog) -> Self {
        Self::with_builder(catalog, |b| b)
    }

    pub fn with_builder(
        catalog: MockCatalog,
        configure: impl FnOnce(ReconcilerBuilder) -> ReconcilerBuilder,
    ) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Arc::new(catalog);

        let directory_map = StaticDirectoryMap::new()
            .with_platform(Firmware::MuOS, "gba", &["gba"], &["mGBA", "VBA-M"])
            .with_platform(Firmware::MuOS, "nes", &["nes"], &["FCEUmm"]);

        let builder = ReconcilerBuilder::new()
            .firmware(Firmware::MuOS)
            .rom_root(temp_dir.path().join("roms"))
            .save_root(temp_dir.path().join("saves"))
            .uploads_dir(temp_dir.path().join("uploads"))
            .cache_path(temp_dir.path().join("cache.json"))
            .parallel_workers(2);

        let reconciler = configure(builder)
            .build(catalog.clone(), Arc::new(directory_map))
            .unwrap();

        Self {
            temp_dir,
            catalog,
            reconciler,
        }
    }

    pub fn rom_path(&self, platform_dir: &str, name: &str) -> PathBuf {
        self.temp_dir.path().join("roms").join(platform_dir).join(name)
    }

    pub fn save_path(&self, folder: &str, name: &str) -> PathBuf {
        self.temp_dir.path().join("saves").join(folder).join(name)
    }

    pub fn write_rom(&self, platform_dir: &str, name: &str, content: &[u8]) -> PathBuf {
        let path = self.rom_path(platform_dir, name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn write_save(&self, folder: &str, name: &str, content: &[u8]) -> PathBuf {
        let path = self.save_path(folder, name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    /// Store an identity in the on-disk cache the next pass loads
    pub fn cache_identity(&self, platform_key: &str, file_name: &str, remote_id: u64, name: &str) {
        let path = self.temp_dir.path().join("cache.json");
        let cache = IdentityCache::load(&path);
        cache.insert(platform_key, file_name, remote_id, name);
        cache.save(&path).unwrap();
    }
}

pub fn set_mtime(path: &Path, time: DateTime<Utc>) {
    let ft = FileTime::from_unix_time(time.timestamp(), 0);
    filetime::set_file_times(path, ft, ft).unwrap();
}

pub fn mtime(path: &Path) -> i64 {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap()).unix_seconds()
}

pub fn remote_save(id: u64, rom_id: u64, file_name: &str, updated_at: DateTime<Utc>) -> RemoteSave {
    RemoteSave {
        id,
        remote_rom_id: rom_id,
        file_name: file_name.to_string(),
        file_extension: naming::extension(file_name).trim_start_matches('.').to_string(),
        download_path: format!("/saves/{}", id),
        updated_at,
        emulator_tag: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_newer_remote_replaces_local_with_backup() {
        let harness = SyncHarness::new(MockCatalog::with_platforms(&[(1, "gba")]));
        harness.write_rom("gba", "zelda.gba", b"rom");
        let save = harness.write_save("mGBA", "zelda.sav", b"local");
        set_mtime(&save, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        harness.cache_identity("gba", "zelda.gba", 42, "The Legend of Zelda");

        let remote_time = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        harness.catalog.add_save(
            1,
            remote_save(5, 42, "zelda [2024-01-02 00-00-00-000].sav", remote_time),
            b"remote",
        );

        let report = harness.reconciler.run_pass().unwrap();
        info!("First pass: {} results", report.results.len());

        assert_eq!(report.downloaded(), 1);
        assert_eq!(report.failed(), 0);
        assert_eq!(fs::read(&save).unwrap(), b"remote");
        assert_eq!(mtime(&save), remote_time.timestamp());

        let backup = harness.save_path("mGBA/.backup", "zelda [2024-01-01 00-00-00].sav");
        assert_eq!(fs::read(backup).unwrap(), b"local");
        assert!(logs_contain("First pass: 1 results"));

        // Nothing changed, so the second pass transfers nothing
        let report = harness.reconciler.run_pass().unwrap();
        assert!(report.is_up_to_date());
        assert_eq!(harness.catalog.downloads(), 1);
    }

    #[test]
    fn test_newer_local_is_uploaded_with_timestamped_name() {
        let harness = SyncHarness::new(MockCatalog::with_platforms(&[(1, "gba")]));
        let rom = harness.write_rom("gba", "Metroid Fusion.gba", b"metroid rom");
        let save = harness.write_save("VBA-M", "Metroid Fusion.sav", b"progress");
        set_mtime(&save, Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap());

        let crc = hashing::crc32_file(&rom).unwrap();
        harness
            .catalog
            .add_checksum(RomChecksum::Crc32(crc), 9, "Metroid Fusion");
        harness.catalog.add_save(
            1,
            remote_save(3, 9, "Metroid Fusion.sav", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            b"old",
        );

        let report = harness.reconciler.run_pass().unwrap();
        assert_eq!(report.uploaded(), 1);

        let uploads = harness.catalog.uploads();
        assert_eq!(uploads.len(), 1);
        let (rom_id, file_name, tag) = &uploads[0];
        assert_eq!(*rom_id, 9);
        assert_eq!(file_name, "Metroid Fusion [2024-02-01 10-00-00-000].sav");
        assert_eq!(tag, "VBA-M");

        // The local save now carries the library's timestamp
        assert_eq!(
            mtime(&save),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap().timestamp()
        );
        // Staged copies never linger
        let staged: Vec<_> = fs::read_dir(harness.temp_dir.path().join("uploads"))
            .unwrap()
            .collect();
        assert!(staged.is_empty());

        // The identity is cached, so the next pass does not hash again
        let queries = harness.catalog.checksum_queries();
        harness.reconciler.run_pass().unwrap();
        assert_eq!(harness.catalog.checksum_queries(), queries);
    }

    #[test]
    fn test_unmatched_save_waits_out_cooldown() {
        let harness = SyncHarness::new(MockCatalog::with_platforms(&[(2, "nes")]));
        harness.write_rom("nes", "Homebrew Quest.nes", b"homebrew");
        harness.write_save("FCEUmm", "Homebrew Quest.sav", b"save");

        let report = harness.reconciler.run_pass().unwrap();
        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(report.unmatched[0].rom_name, "Homebrew Quest.nes");
        // One CRC32 and one SHA-1 lookup
        assert_eq!(harness.catalog.checksum_queries(), 2);

        let report = harness.reconciler.run_pass().unwrap();
        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(harness.catalog.checksum_queries(), 2);
    }

    #[test]
    fn test_zero_cooldown_retries_lookups() {
        let harness = SyncHarness::with_builder(
            MockCatalog::with_platforms(&[(2, "nes")]),
            |b| b.lookup_cooldown(std::time::Duration::ZERO),
        );
        harness.write_rom("nes", "Homebrew Quest.nes", b"homebrew");
        harness.write_save("FCEUmm", "Homebrew Quest.sav", b"save");

        harness.reconciler.run_pass().unwrap();
        harness.reconciler.run_pass().unwrap();
        assert_eq!(harness.catalog.checksum_queries(), 4);
    }

    #[test]
    fn test_fuzzy_candidate_needs_confirmation() {
        let harness = SyncHarness::new(MockCatalog::with_platforms(&[(2, "nes")]));
        harness.write_rom("nes", "Super Mario Bros 3 (USA).nes", b"smb3");
        harness.write_save("FCEUmm", "Super Mario Bros 3 (USA).sav", b"world 8");
        harness.catalog.add_title(2, 31, "Super Mario Bros. 3");
        harness.catalog.add_title(2, 32, "Duck Hunt");

        let plan = harness.reconciler.plan().unwrap();
        assert!(plan.syncs.is_empty());
        assert!(plan.unmatched.is_empty());
        assert_eq!(plan.pending.len(), 1);

        let candidate = &plan.pending[0];
        assert_eq!(candidate.candidate_remote_id, 31);
        assert_eq!(candidate.candidate_name, "Super Mario Bros. 3");
        assert!(candidate.similarity_score >= 0.80);

        harness.reconciler.confirm_fuzzy_match(candidate).unwrap();

        let report = harness.reconciler.run_pass().unwrap();
        assert_eq!(report.uploaded(), 1);
        assert_eq!(harness.catalog.uploads()[0].0, 31);
    }

    #[test]
    fn test_rejected_fuzzy_candidate_skips_hashing() {
        let harness = SyncHarness::new(MockCatalog::with_platforms(&[(2, "nes")]));
        harness.write_rom("nes", "Super Mario Bros 3 (USA).nes", b"smb3");
        harness.write_save("FCEUmm", "Super Mario Bros 3 (USA).sav", b"world 8");
        harness.catalog.add_title(2, 31, "Super Mario Bros. 3");

        let plan = harness.reconciler.plan().unwrap();
        let queries = harness.catalog.checksum_queries();
        harness.reconciler.reject_fuzzy_match(&plan.pending[0]).unwrap();

        let report = harness.reconciler.run_pass().unwrap();
        assert_eq!(harness.catalog.checksum_queries(), queries);
        assert!(harness.catalog.uploads().is_empty());
        assert_eq!(report.uploaded(), 0);
    }

    #[test]
    fn test_first_download_uses_selected_emulator() {
        let harness = SyncHarness::new(MockCatalog::with_platforms(&[(1, "gba")]));
        harness.write_rom("gba", "Golden Sun.gba", b"rom");
        harness.cache_identity("gba", "Golden Sun.gba", 12, "Golden Sun");
        harness.catalog.add_save(
            1,
            remote_save(8, 12, "Golden Sun.srm", Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap()),
            b"psynergy",
        );

        let mut plan = harness.reconciler.plan().unwrap();
        assert_eq!(plan.needing_emulator_selection().count(), 1);
        assert!(harness.reconciler.needs_emulator_selection(&plan.syncs[0]));

        plan.syncs[0].selected_emulator_dir = Some("VBA-M".to_string());
        let report = harness.reconciler.execute(plan).unwrap();
        assert_eq!(report.downloaded(), 1);

        let written = harness.save_path("VBA-M", "Golden Sun.srm");
        assert_eq!(fs::read(&written).unwrap(), b"psynergy");
        assert!(!harness.save_path("mGBA", "Golden Sun.srm").exists());
    }

    #[test]
    fn test_preselected_emulator_applies_to_plan() {
        let harness = SyncHarness::with_builder(
            MockCatalog::with_platforms(&[(1, "gba")]),
            |b| b.emulator_selection("gba", "mGBA"),
        );
        harness.write_rom("gba", "Golden Sun.gba", b"rom");
        harness.cache_identity("gba", "Golden Sun.gba", 12, "Golden Sun");
        harness.catalog.add_save(
            1,
            remote_save(8, 12, "Golden Sun.srm", Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap()),
            b"psynergy",
        );

        let plan = harness.reconciler.plan().unwrap();
        assert_eq!(plan.syncs[0].selected_emulator_dir.as_deref(), Some("mGBA"));
        assert_eq!(plan.needing_emulator_selection().count(), 0);

        let report = harness.reconciler.execute(plan).unwrap();
        assert_eq!(report.downloaded(), 1);
        assert!(harness.save_path("mGBA", "Golden Sun.srm").exists());
    }

    #[test]
    fn test_single_save_folder_needs_no_selection() {
        let harness = SyncHarness::new(MockCatalog::with_platforms(&[(2, "nes")]));
        harness.write_rom("nes", "Zelda II.nes", b"rom");
        harness.cache_identity("nes", "Zelda II.nes", 4, "Zelda II");
        harness.catalog.add_save(
            2,
            remote_save(9, 4, "Zelda II [2024-01-05 08-30-00-250].sav", Utc.with_ymd_and_hms(2024, 1, 5, 8, 30, 0).unwrap()),
            b"link",
        );

        let report = harness.reconciler.run_pass().unwrap();
        assert_eq!(report.downloaded(), 1);
        assert_eq!(fs::read(harness.save_path("FCEUmm", "Zelda II.sav")).unwrap(), b"link");
    }
}
