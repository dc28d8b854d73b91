//! # savesync - Emulator save reconciliation
//!
//! Keeps the per-game save files on a handheld emulation device in step with
//! the saves stored in a remote game library.
//!
//! ## Overview
//!
//! For every ROM on the device, savesync:
//! - Finds the local save that shares the ROM's base name
//! - Works out which remote ROM it is (identity cache, CRC32/SHA1 lookup,
//!   then a fuzzy title match that needs user confirmation)
//! - Compares the local modification time with the newest remote save
//! - Uploads the local save, downloads the remote one, or leaves both alone
//!
//! Downloads back up the save they replace and stamp the new file with the
//! remote timestamp, so a second pass with nothing changed does nothing.
//!
//! ## Architecture
//!
//! - **Scanner**: walks tag-based (NextUI) or direct-path (muOS, Knulli)
//!   folder layouts
//! - **Resolver**: three-stage identity cascade backed by a persistent cache
//!   with a failed-lookup cooldown
//! - **Planner**: per-game action with whole-second timestamp comparison
//! - **Executor**: backups, atomic writes, staged uploads
//! - **Reconciler**: runs the phases, fans out per platform on a bounded
//!   rayon pool, and turns per-unit failures into report entries
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use savesync::{Firmware, ReconcilerBuilder, RemoteCatalog, StaticDirectoryMap};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let catalog: Arc<dyn RemoteCatalog> = unimplemented!();
//! let directories = StaticDirectoryMap::new()
//!     .with_platform(Firmware::MuOS, "gba", &["gba"], &["mGBA"]);
//!
//! let reconciler = ReconcilerBuilder::new()
//!     .firmware(Firmware::MuOS)
//!     .rom_root("/mnt/mmc/ROMS")
//!     .save_root("/mnt/mmc/MUOS/save/file")
//!     .build(catalog, Arc::new(directories))?;
//!
//! let plan = reconciler.plan()?;
//! for candidate in &plan.pending {
//!     println!("Is '{}' really '{}'?", candidate.local_file_name, candidate.candidate_name);
//! }
//!
//! let report = reconciler.execute(plan)?;
//! println!(
//!     "{} uploaded, {} downloaded, {} failed",
//!     report.uploaded(),
//!     report.downloaded(),
//!     report.failed()
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Only an unavailable remote platform list fails a pass. Unreadable
//! folders, failed platform fetches, unhashable ROMs and failed transfers are
//! all recorded in the [`ReconcileReport`].

// Public API modules
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod hashing;
pub mod naming;
pub mod parallel;
pub mod planner;
pub mod platform;
pub mod reconciler;
pub mod resolver;
pub mod scanner;
pub mod types;

// Internal modules (not part of public API)
mod utils;

// Re-export main types for convenience
pub use cache::{CachedIdentity, IdentityCache, IdentityRecord};
pub use catalog::{RemoteCatalog, TimedCatalog};
pub use config::{ConfigStore, DirectoryMapping, SyncConfig};
pub use error::{Result, SyncError};
pub use executor::SyncExecutor;
pub use platform::{Firmware, FirmwareLayout, PlatformDirectoryMap, StaticDirectoryMap};
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use resolver::{IdentityResolver, Resolution, ResolutionSource, ResolverCounters};
pub use scanner::{DirectoryScanner, EmulatorDirectory, ScanOutcome};
pub use types::*;
