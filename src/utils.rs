//! Utility functions for savesync
//!
//! File helpers shared by the scanner, executor and identity cache:
//! atomic writes, modification-time reads and writes, and hidden-entry
//! checks.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::utils::{atomic_write, set_modified_time};
//! use chrono::Utc;
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let path = Path::new("zelda.sav");
//! atomic_write(path, b"save bytes")?;
//! set_modified_time(path, &Utc::now())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! All utility functions are thread-safe and can be called concurrently from
//! multiple threads without synchronization.

use crate::error::Result;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Write a file atomically
///
/// Writes the content to a sibling temporary file and renames it over the
/// target, so readers never observe a partially written save. Parent
/// directories are created as needed.
///
/// # Errors
///
/// - [`SyncError::Io`](crate::SyncError::Io) if the directory, the temporary
///   file or the rename fails
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = temp_sibling(path);

    if let Err(e) = fs::write(&temp_path, content) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// `<path>.tmp`, keeping the original extension in the name
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read a file's modification time as UTC
pub fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Set both access and modification time of a file
pub fn set_modified_time(path: &Path, time: &DateTime<Utc>) -> Result<()> {
    let file_time = FileTime::from_unix_time(time.timestamp(), time.timestamp_subsec_nanos());
    filetime::set_file_times(path, file_time, file_time)?;
    trace!("Set mtime of {:?} to {}", path, time);
    Ok(())
}

/// Whether a directory entry name is hidden (dot-prefixed)
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
