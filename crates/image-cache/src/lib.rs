//! Disk-backed cache of pre-scaled images for display items
//!
//! Given a source image and the size and fill-mode it is displayed at, this
//! crate resolves a cached PNG rendition, generating it in the background on
//! first access and reusing it afterwards.
//!
//! # Features
//!
//! - **Content-addressed keys**: SHA-256 of canonical path, size and mtime, so
//!   edited files get fresh entries without explicit invalidation
//! - **Stable file layout**: `<key>@<w>x<h>-<crop|fit|stretch>.png` in one
//!   directory, usable by external pre-warming and inspection tools
//! - **Single-flight generation**: one in-flight attempt per cache file across
//!   the whole process
//! - **Fire-and-forget**: lookups never block on generation; the original
//!   source is shown until the rendition exists
//! - **Warm-only mode**: fill the cache without touching what is displayed

pub mod cache;
pub mod error;
pub mod generate;
pub mod key;
pub mod location;
pub mod manager;
pub mod pending;
pub mod pool;
pub mod target;

pub use cache::{ImageCache, Lookup};
pub use error::CacheError;
pub use generate::{generate, render, scaled_size};
pub use key::{derive_key, CacheKey, SourceDescriptor};
pub use location::{cache_file_name, resolve_cache_path, CacheDir, CacheLocation};
pub use manager::{CachingImageManager, ConnectionId, ImageItem, ManagerEvent};
pub use pending::{PendingGuard, PendingRegistry};
pub use pool::{InlinePool, RayonPool, TaskPool};
pub use target::{FillMode, TargetSpec};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Base directory, as a path or `file://` URL.
    pub cache_dir: String,
    /// Fill the cache without publishing display paths.
    #[serde(default)]
    pub warm_only: bool,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            warm_only: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(default_cache_dir().to_string_lossy().into_owned())
    }
}

/// `<platform cache dir>/caching-image`, or under the temp dir if the platform
/// has none.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("caching-image")
}
