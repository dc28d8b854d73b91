//! Error types for the savesync library
//!
//! Every failure a reconciliation pass can hit is a variant of [`SyncError`].
//! Most of them are per-unit: a platform that cannot be scanned, a catalog
//! fetch that timed out, a ROM that could not be hashed, a single transfer
//! that failed. Those are captured into the pass report instead of aborting
//! it. Only [`SyncError::NoPlatforms`] ends a pass early, because nothing can
//! be resolved without the remote platform list.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Type alias for Results in the savesync library
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for all savesync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// I/O errors during file operations (write, backup, timestamp updates)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// A platform directory exists but could not be read
    #[error("Cannot scan {path:?}: {source}")]
    Scan {
        /// Directory that failed to list
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Remote saves for a platform could not be fetched
    #[error("Fetch failed for platform '{platform}': {message}")]
    Fetch {
        /// Platform key whose fetch failed
        platform: String,
        /// Description of the remote failure
        message: String,
    },

    /// A ROM checksum could not be computed
    #[error("Cannot hash {path:?}: {source}")]
    Hash {
        /// ROM file being hashed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A sync was attempted for a game with no resolved remote identity
    #[error("Orphan ROM: no remote identity for '{0}'")]
    Orphan(String),

    /// Context required to carry out a transfer is missing
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Remote catalog reported a failure
    #[error("Remote catalog error: {0}")]
    Remote(String),

    /// Remote catalog call exceeded the configured timeout
    #[error("Remote catalog timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    /// The remote platform list is unavailable, so no pass can run
    #[error("No remote platforms available: {0}")]
    NoPlatforms(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create a transfer error with a custom message
    pub fn transfer(msg: impl Into<String>) -> Self {
        SyncError::Transfer(msg.into())
    }

    /// Create a remote catalog error with a custom message
    pub fn remote(msg: impl Into<String>) -> Self {
        SyncError::Remote(msg.into())
    }

    /// Create a fetch error for a platform
    pub fn fetch(platform: impl Into<String>, msg: impl Into<String>) -> Self {
        SyncError::Fetch {
            platform: platform.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SyncError::Internal(msg.into())
    }

    /// Check if this error is confined to a single unit of work
    ///
    /// Recoverable errors are recorded in the pass report and the pass
    /// continues with the remaining platforms, files, or syncs.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SyncError::NoPlatforms(_)
                | SyncError::InvalidConfiguration(_)
                | SyncError::ThreadPool(_)
        )
    }

    /// Check if this error came from the remote side of the sync
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::Remote(_) | SyncError::Timeout(_) | SyncError::Fetch { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SyncError::NoPlatforms(_) => {
                "The game library did not return any platforms. Check the server address and credentials, then retry.".to_string()
            }
            SyncError::Timeout(duration) => {
                format!(
                    "The game library did not answer within {}. Increase 'api_timeout' or check the network.",
                    humantime::format_duration(*duration)
                )
            }
            SyncError::Orphan(game) => {
                format!("'{}' is not linked to a game in the library. Confirm a match or rename the ROM.", game)
            }
            SyncError::Scan { path, .. } => {
                format!("Could not read {:?}. Check that the SD card is mounted and readable.", path)
            }
            _ => self.to_string(),
        }
    }
}
