//! Content-addressed cache keys derived from source file identity
//!
//! A key is the SHA-256 of `canonical_path:size:mtime_ms`, with the path taken
//! as raw OS bytes. No file content is hashed: touching a file or replacing it
//! with one of a different size is enough to produce a fresh key, which
//! naturally leaves stale entries behind instead of requiring explicit
//! invalidation.

use crate::error::{CacheError, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity metadata of a source file, read fresh on every lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub path: PathBuf,
    pub canonical_path: PathBuf,
    pub size: u64,
    /// Last modification time in UTC milliseconds since the Unix epoch.
    pub modified_ms: i64,
}

impl SourceDescriptor {
    /// Stat `path`. Fails unless it names an existing regular file.
    pub fn read(path: &Path) -> Result<Self> {
        let stat_error = || CacheError::Stat {
            path: path.to_path_buf(),
        };

        let metadata = fs::metadata(path).map_err(|_| stat_error())?;
        if !metadata.is_file() {
            return Err(stat_error());
        }
        let modified = metadata.modified().map_err(|_| stat_error())?;

        let canonical_path = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(_) => absolute_path(path).map_err(|_| stat_error())?,
        };

        Ok(Self {
            path: path.to_path_buf(),
            canonical_path,
            size: metadata.len(),
            modified_ms: epoch_millis(modified),
        })
    }

    /// Human-readable `path:size:timestamp`. Lossy for paths that are not
    /// valid UTF-8; the key hashes [`Self::identity_bytes`] instead.
    pub fn identity(&self) -> String {
        format!(
            "{}:{}:{}",
            self.canonical_path.to_string_lossy(),
            self.size,
            self.modified_ms
        )
    }

    /// The bytes that get hashed: the canonical path exactly as the OS stores
    /// it, then `:size:timestamp`. Identical to [`Self::identity`] for UTF-8
    /// paths.
    pub fn identity_bytes(&self) -> Vec<u8> {
        let mut bytes = self.canonical_path.as_os_str().as_encoded_bytes().to_vec();
        bytes.extend_from_slice(format!(":{}:{}", self.size, self.modified_ms).as_bytes());
        bytes
    }

    pub fn cache_key(&self) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(self.identity_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }
}

/// Lowercase hex SHA-256 digest identifying one version of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for `path`, or `None` if it is not a regular file.
pub fn derive_key(path: &Path) -> Option<CacheKey> {
    match SourceDescriptor::read(path) {
        Ok(descriptor) => Some(descriptor.cache_key()),
        Err(e) => {
            log::warn!("{}", e);
            None
        }
    }
}

fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}
