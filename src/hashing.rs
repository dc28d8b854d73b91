//! ROM checksums for catalog lookups
//!
//! The remote library indexes ROMs by CRC32 and SHA1. Both are computed by
//! streaming the file through an 8KB buffer so large disc images never have
//! to fit in memory. Digests are lowercase hex: 8 digits for CRC32 and 40 for
//! SHA1.

use crate::error::{Result, SyncError};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUFFER_SIZE: usize = 8192;

/// Stream a file through `update`, mapping I/O failures to [`SyncError::Hash`]
fn stream_file(path: &Path, mut update: impl FnMut(&[u8])) -> Result<()> {
    let hash_err = |source| SyncError::Hash {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(hash_err)?;
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(hash_err)?;
        if bytes_read == 0 {
            break;
        }
        update(&buffer[..bytes_read]);
    }

    Ok(())
}

/// CRC32 of a file as 8 lowercase hex digits
///
/// # Errors
///
/// - [`SyncError::Hash`] if the file cannot be opened or read
pub fn crc32_file(path: &Path) -> Result<String> {
    let mut hasher = crc32fast::Hasher::new();
    stream_file(path, |chunk| hasher.update(chunk))?;
    Ok(format!("{:08x}", hasher.finalize()))
}

/// SHA1 of a file as 40 lowercase hex digits
///
/// # Errors
///
/// - [`SyncError::Hash`] if the file cannot be opened or read
pub fn sha1_file(path: &Path) -> Result<String> {
    let mut hasher = Sha1::new();
    stream_file(path, |chunk| hasher.update(chunk))?;
    Ok(hex::encode(hasher.finalize()))
}
