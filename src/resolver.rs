//! ROM identity resolution
//!
//! Links a local ROM file to a remote ROM through a three-stage cascade:
//!
//! 1. **Cache**: a previously resolved `(platform key, file name)` pair.
//!    Costs nothing and never touches the file or the network.
//! 2. **Hash**: CRC32 then SHA1 of the ROM, each looked up in the catalog.
//!    Skipped while a recent failed lookup is inside the cooldown window.
//! 3. **Fuzzy**: the normalized file name compared against cached remote
//!    titles for the platform. A match above the threshold is only a
//!    *candidate*; it is never trusted until the user confirms it.
//!
//! Stages 2 and 3 only run for ROMs that have a local save, because a ROM
//! without a save has nothing to upload and only a cached identity can
//! discover remote saves for it.
//!
//! Hashing and catalog failures are logged and treated as a miss, so a
//! single unreadable ROM or flaky request never fails the pass.

use crate::cache::IdentityCache;
use crate::catalog::RemoteCatalog;
use crate::config::{DEFAULT_FUZZY_THRESHOLD, DEFAULT_LOOKUP_COOLDOWN};
use crate::hashing;
use crate::naming;
use crate::types::{CatalogRom, LocalRomFile, PendingFuzzyMatch, RomChecksum, UnmatchedSave};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Which stage produced an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Identity cache hit
    Cache,
    /// CRC32 catalog lookup
    Crc32,
    /// SHA1 catalog lookup
    Sha1,
}

/// Outcome of resolving one ROM
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Remote identity known
    Resolved {
        /// Remote ROM id
        remote_id: u64,
        /// Remote ROM name
        remote_name: String,
        /// Stage that produced it
        source: ResolutionSource,
    },
    /// Fuzzy candidate awaiting confirmation
    Pending(PendingFuzzyMatch),
    /// Save whose ROM could not be identified
    Unmatched(UnmatchedSave),
    /// No save and no cached identity: nothing to resolve
    Skipped,
}

/// Counters describing the work a resolver performed
#[derive(Debug, Default)]
pub struct ResolverStats {
    cache_hits: AtomicUsize,
    hash_computations: AtomicUsize,
    catalog_queries: AtomicUsize,
    fuzzy_candidates: AtomicUsize,
    unmatched: AtomicUsize,
}

/// Point-in-time copy of [`ResolverStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverCounters {
    /// Identities served from the cache
    pub cache_hits: usize,
    /// Checksums computed
    pub hash_computations: usize,
    /// Checksum queries sent to the catalog
    pub catalog_queries: usize,
    /// Fuzzy candidates produced
    pub fuzzy_candidates: usize,
    /// Saves left unmatched
    pub unmatched: usize,
}

impl ResolverStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters
    pub fn snapshot(&self) -> ResolverCounters {
        ResolverCounters {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            hash_computations: self.hash_computations.load(Ordering::Relaxed),
            catalog_queries: self.catalog_queries.load(Ordering::Relaxed),
            fuzzy_candidates: self.fuzzy_candidates.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
        }
    }
}

/// Resolves local ROMs to remote identities
///
/// Safe to share across worker threads: the cache is concurrent and the
/// counters are atomic.
pub struct IdentityResolver<'a> {
    catalog: &'a dyn RemoteCatalog,
    cache: &'a IdentityCache,
    fuzzy_threshold: f64,
    lookup_cooldown: Duration,
    stats: ResolverStats,
}

impl<'a> IdentityResolver<'a> {
    /// Create a resolver with default threshold and cooldown
    pub fn new(catalog: &'a dyn RemoteCatalog, cache: &'a IdentityCache) -> Self {
        Self {
            catalog,
            cache,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            lookup_cooldown: DEFAULT_LOOKUP_COOLDOWN,
            stats: ResolverStats::default(),
        }
    }

    /// Set the minimum fuzzy similarity
    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    /// Set the failed-lookup cooldown
    pub fn with_lookup_cooldown(mut self, cooldown: Duration) -> Self {
        self.lookup_cooldown = cooldown;
        self
    }

    /// Work counters so far
    pub fn stats(&self) -> ResolverCounters {
        self.stats.snapshot()
    }

    /// Resolve one ROM through the cascade
    pub fn resolve(&self, rom: &LocalRomFile) -> Resolution {
        if let Some(hit) = self.cache.lookup(&rom.platform_key, &rom.file_name) {
            trace!("Cache hit for {}/{}", rom.platform_key, rom.file_name);
            ResolverStats::bump(&self.stats.cache_hits);
            return Resolution::Resolved {
                remote_id: hit.remote_id,
                remote_name: hit.remote_name,
                source: ResolutionSource::Cache,
            };
        }

        let Some(save) = rom.local_save.as_ref() else {
            return Resolution::Skipped;
        };

        if let Some(resolution) = self.resolve_by_hash(rom) {
            return resolution;
        }

        if let Some(candidate) = self.fuzzy_candidate(rom) {
            info!(
                "Fuzzy candidate for {}: '{}' ({:.2})",
                rom.file_name, candidate.name, candidate.score
            );
            ResolverStats::bump(&self.stats.fuzzy_candidates);
            return Resolution::Pending(PendingFuzzyMatch {
                local_file_name: rom.file_name.clone(),
                local_path: rom.file_path.clone(),
                save_path: save.path.clone(),
                platform_key: rom.platform_key.clone(),
                candidate_remote_id: candidate.id,
                candidate_name: candidate.name,
                similarity_score: candidate.score,
            });
        }

        debug!("No identity for {}/{}", rom.platform_key, rom.file_name);
        self.cache
            .record_failed_lookup(&rom.platform_key, &rom.file_name, Utc::now());
        ResolverStats::bump(&self.stats.unmatched);

        Resolution::Unmatched(UnmatchedSave {
            save_path: save.path.clone(),
            rom_path: rom.file_path.clone(),
            rom_name: rom.file_name.clone(),
            platform_key: rom.platform_key.clone(),
        })
    }

    /// Hash stage; `None` means fall through to fuzzy matching
    fn resolve_by_hash(&self, rom: &LocalRomFile) -> Option<Resolution> {
        let now = Utc::now();
        if !self.cache.should_attempt_lookup(
            &rom.platform_key,
            &rom.file_name,
            now,
            self.lookup_cooldown,
        ) {
            debug!("Skipping hash lookup for {} (cooldown)", rom.file_name);
            return None;
        }

        for source in [ResolutionSource::Crc32, ResolutionSource::Sha1] {
            ResolverStats::bump(&self.stats.hash_computations);
            let digest = match source {
                ResolutionSource::Sha1 => hashing::sha1_file(&rom.file_path).map(RomChecksum::Sha1),
                _ => hashing::crc32_file(&rom.file_path).map(RomChecksum::Crc32),
            };
            let checksum = match digest {
                Ok(checksum) => checksum,
                Err(e) => {
                    warn!("Cannot hash {:?}: {}", rom.file_path, e);
                    if source == ResolutionSource::Sha1 {
                        self.cache
                            .record_failed_lookup(&rom.platform_key, &rom.file_name, now);
                    }
                    return None;
                }
            };

            ResolverStats::bump(&self.stats.catalog_queries);
            match self.catalog.get_rom_by_checksum(&checksum) {
                Ok(Some(remote)) if remote.id > 0 => {
                    info!("Resolved {} by {} to '{}'", rom.file_name, checksum, remote.name);
                    self.cache
                        .insert(&rom.platform_key, &rom.file_name, remote.id, &remote.name);
                    self.cache
                        .clear_failed_lookup(&rom.platform_key, &rom.file_name);
                    return Some(Resolution::Resolved {
                        remote_id: remote.id,
                        remote_name: remote.name,
                        source,
                    });
                }
                Ok(_) => trace!("No catalog match for {}", checksum),
                Err(e) => warn!("Checksum lookup for {} failed: {}", rom.file_name, e),
            }
        }

        None
    }

    /// Best cached title for a ROM at or above the threshold
    fn fuzzy_candidate(&self, rom: &LocalRomFile) -> Option<FuzzyCandidate> {
        let titles = self.cache.titles(&rom.platform_key);
        best_fuzzy_match(&rom.file_name, &titles, self.fuzzy_threshold)
    }
}

/// Highest-scoring title for a name
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyCandidate {
    /// Remote ROM id
    pub id: u64,
    /// Remote ROM name
    pub name: String,
    /// Similarity in `[0, 1]`
    pub score: f64,
}

/// Compare a file name against titles and return the best one at or above `threshold`
///
/// Ties keep the first title seen.
pub fn best_fuzzy_match(file_name: &str, titles: &[CatalogRom], threshold: f64) -> Option<FuzzyCandidate> {
    let local = naming::normalize_for_comparison(file_name);
    if local.is_empty() {
        return None;
    }

    let mut best: Option<FuzzyCandidate> = None;
    for title in titles {
        let score = naming::similarity(&local, &naming::normalize_for_comparison(&title.name));
        if score < threshold {
            continue;
        }
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(FuzzyCandidate {
                id: title.id,
                name: title.name.clone(),
                score,
            });
        }
    }
    best
}
