//! Persistent identity cache
//!
//! Resolving a ROM's remote identity can mean hashing a multi-gigabyte disc
//! image and querying the library twice. The [`IdentityCache`] remembers
//! every resolved `(platform key, ROM file name)` pair so later passes skip
//! all of that, and keeps a cooldown ledger of failed lookups so a ROM the
//! library does not know is not re-hashed on every pass.
//!
//! The cache also stores per-platform remote titles, which are the candidate
//! list for fuzzy matching.
//!
//! The cache is concurrency-safe (DashMap) and persisted as one JSON
//! document: read entirely when a pass starts, written atomically when it
//! ends. A missing or corrupt file is an empty cache, never an error.

use crate::error::Result;
use crate::types::CatalogRom;
use crate::utils;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const SNAPSHOT_VERSION: u32 = 1;

/// `(platform key, ROM file name)`
type CacheKey = (String, String);

/// A cached remote identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedIdentity {
    /// Remote ROM id
    pub remote_id: u64,
    /// Remote ROM name
    pub remote_name: String,
}

/// One cached mapping, as listed by [`IdentityCache::identities`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Platform key
    pub platform_key: String,
    /// Local ROM file name
    pub file_name: String,
    /// Remote identity
    #[serde(flatten)]
    pub identity: CachedIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FailedLookup {
    platform_key: String,
    file_name: String,
    failed_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheSnapshot {
    version: u32,
    #[serde(default)]
    identities: Vec<IdentityRecord>,
    #[serde(default)]
    failed_lookups: Vec<FailedLookup>,
    #[serde(default)]
    titles: BTreeMap<String, Vec<CatalogRom>>,
}

/// Concurrency-safe identity cache with a failed-lookup ledger
#[derive(Debug, Default)]
pub struct IdentityCache {
    identities: DashMap<CacheKey, CachedIdentity>,
    failed_lookups: DashMap<CacheKey, DateTime<Utc>>,
    titles: DashMap<String, Vec<CatalogRom>>,
}

fn key(platform_key: &str, file_name: &str) -> CacheKey {
    (platform_key.to_string(), file_name.to_string())
}

impl IdentityCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache file
    ///
    /// A missing file yields an empty cache. An unreadable or corrupt file
    /// is logged and also yields an empty cache.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!("No identity cache at {:?}, starting empty", path);
            return Self::new();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read identity cache {:?}: {}", path, e);
                return Self::new();
            }
        };

        match serde_json::from_str::<CacheSnapshot>(&content) {
            Ok(snapshot) => {
                let cache = Self::from_snapshot(snapshot);
                info!(
                    "Loaded identity cache: {} identities, {} failed lookups",
                    cache.len(),
                    cache.failed_lookup_count()
                );
                cache
            }
            Err(e) => {
                warn!("Ignoring corrupt identity cache {:?}: {}", path, e);
                Self::new()
            }
        }
    }

    /// Write the cache atomically as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        utils::atomic_write(path, json.as_bytes())?;
        debug!("Saved identity cache with {} identities to {:?}", self.len(), path);
        Ok(())
    }

    fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        let cache = Self::new();
        for record in snapshot.identities {
            cache
                .identities
                .insert((record.platform_key, record.file_name), record.identity);
        }
        for failed in snapshot.failed_lookups {
            cache
                .failed_lookups
                .insert((failed.platform_key, failed.file_name), failed.failed_at);
        }
        for (platform, roms) in snapshot.titles {
            cache.titles.insert(platform, roms);
        }
        cache
    }

    fn snapshot(&self) -> CacheSnapshot {
        let mut failed_lookups: Vec<FailedLookup> = self
            .failed_lookups
            .iter()
            .map(|e| FailedLookup {
                platform_key: e.key().0.clone(),
                file_name: e.key().1.clone(),
                failed_at: *e.value(),
            })
            .collect();
        failed_lookups.sort_by(|a, b| {
            (&a.platform_key, &a.file_name).cmp(&(&b.platform_key, &b.file_name))
        });

        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            identities: self.identities(),
            failed_lookups,
            titles: self
                .titles
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    /// Cached identity for a ROM
    pub fn lookup(&self, platform_key: &str, file_name: &str) -> Option<CachedIdentity> {
        self.identities
            .get(&key(platform_key, file_name))
            .map(|e| e.value().clone())
    }

    /// Remember a resolved identity
    pub fn insert(&self, platform_key: &str, file_name: &str, remote_id: u64, remote_name: &str) {
        self.identities.insert(
            key(platform_key, file_name),
            CachedIdentity {
                remote_id,
                remote_name: remote_name.to_string(),
            },
        );
    }

    /// Drop one identity; returns whether it existed
    pub fn forget(&self, platform_key: &str, file_name: &str) -> bool {
        let k = key(platform_key, file_name);
        self.failed_lookups.remove(&k);
        self.identities.remove(&k).is_some()
    }

    /// Record a failed lookup at `now`
    pub fn record_failed_lookup(&self, platform_key: &str, file_name: &str, now: DateTime<Utc>) {
        self.failed_lookups.insert(key(platform_key, file_name), now);
    }

    /// Clear a failed-lookup entry
    pub fn clear_failed_lookup(&self, platform_key: &str, file_name: &str) {
        self.failed_lookups.remove(&key(platform_key, file_name));
    }

    /// When the last failed lookup happened, if any
    pub fn last_failed_lookup(&self, platform_key: &str, file_name: &str) -> Option<DateTime<Utc>> {
        self.failed_lookups
            .get(&key(platform_key, file_name))
            .map(|e| *e.value())
    }

    /// Whether hashing and catalog queries may run for this ROM
    ///
    /// False while a recorded failure is younger than `cooldown`.
    pub fn should_attempt_lookup(
        &self,
        platform_key: &str,
        file_name: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> bool {
        match self.last_failed_lookup(platform_key, file_name) {
            None => true,
            Some(failed_at) => match (now - failed_at).to_std() {
                Ok(elapsed) => elapsed >= cooldown,
                // Failure recorded in the future (clock moved back): wait it out
                Err(_) => false,
            },
        }
    }

    /// Remote titles cached for a platform
    pub fn titles(&self, platform_key: &str) -> Vec<CatalogRom> {
        self.titles
            .get(platform_key)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Whether any titles are cached for a platform
    pub fn has_titles(&self, platform_key: &str) -> bool {
        self.titles
            .get(platform_key)
            .map(|e| !e.value().is_empty())
            .unwrap_or(false)
    }

    /// Replace the titles cached for a platform
    pub fn set_titles(&self, platform_key: &str, roms: Vec<CatalogRom>) {
        self.titles.insert(platform_key.to_string(), roms);
    }

    /// All identities sorted by platform key and file name
    pub fn identities(&self) -> Vec<IdentityRecord> {
        let mut records: Vec<IdentityRecord> = self
            .identities
            .iter()
            .map(|e| IdentityRecord {
                platform_key: e.key().0.clone(),
                file_name: e.key().1.clone(),
                identity: e.value().clone(),
            })
            .collect();
        records.sort_by(|a, b| (&a.platform_key, &a.file_name).cmp(&(&b.platform_key, &b.file_name)));
        records
    }

    /// Number of cached identities
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether no identities are cached
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Number of failed-lookup entries
    pub fn failed_lookup_count(&self) -> usize {
        self.failed_lookups.len()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.identities.clear();
        self.failed_lookups.clear();
        self.titles.clear();
    }
}
