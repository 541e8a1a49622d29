//! Cache store: resolve a source to its cache file and schedule generation
//!
//! The filesystem is the only state. A cache entry is valid exactly when a
//! file with the expected name exists and decodes; there is no index and no
//! eviction.

use crate::error::Result;
use crate::generate::run_detached;
use crate::key::SourceDescriptor;
use crate::location::{resolve_cache_location, CacheDir, CacheLocation};
use crate::pending::PendingRegistry;
use crate::pool::{RayonPool, TaskPool};
use crate::target::TargetSpec;
use crate::CacheConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of looking a source up in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A decodable cache file already exists.
    Hit(PathBuf),
    /// Nothing usable on disk yet at this path.
    Miss(PathBuf),
}

impl Lookup {
    pub fn path(&self) -> &Path {
        match self {
            Lookup::Hit(path) | Lookup::Miss(path) => path,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Disk cache of pre-scaled renditions.
///
/// Cloning is cheap; clones share the pending registry and worker pool.
#[derive(Clone)]
pub struct ImageCache {
    dir: CacheDir,
    pending: Arc<PendingRegistry>,
    pool: Arc<dyn TaskPool>,
}

impl ImageCache {
    /// Cache in `dir` using the process-wide pending registry, generating on
    /// rayon's global pool.
    pub fn new(dir: impl Into<CacheDir>) -> Self {
        Self::with_parts(dir, PendingRegistry::global(), Arc::new(RayonPool::global()))
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(CacheDir::new(config.cache_dir.clone()))
    }

    /// Cache with an explicit registry and pool. Every cache writing to the
    /// same directory in one process should share one registry; a fresh
    /// registry here gives an isolated instance.
    pub fn with_parts(
        dir: impl Into<CacheDir>,
        pending: Arc<PendingRegistry>,
        pool: Arc<dyn TaskPool>,
    ) -> Self {
        Self {
            dir: dir.into(),
            pending,
            pool,
        }
    }

    /// Same registry and pool, different directory.
    pub fn with_dir(&self, dir: impl Into<CacheDir>) -> Self {
        Self::with_parts(dir, Arc::clone(&self.pending), Arc::clone(&self.pool))
    }

    pub fn dir(&self) -> &CacheDir {
        &self.dir
    }

    pub fn pending(&self) -> &Arc<PendingRegistry> {
        &self.pending
    }

    /// Where the rendition of `source` at `target` lives, whether or not it is
    /// local. Fails if `source` is not a regular file.
    pub fn locate(&self, source: &Path, target: &TargetSpec) -> Result<CacheLocation> {
        let key = SourceDescriptor::read(source)?.cache_key();
        Ok(resolve_cache_location(&self.dir, &key, target))
    }

    /// Check the local cache file for `source` at `target`.
    pub fn lookup(&self, source: &Path, target: &TargetSpec) -> Result<Lookup> {
        let location = self.locate(source, target)?;
        let path = location.to_local_path()?.to_path_buf();
        Ok(if is_valid_entry(&path) {
            Lookup::Hit(path)
        } else {
            Lookup::Miss(path)
        })
    }

    /// Schedule generation of `cache_path` unless it is already in flight.
    /// Returns whether a task was submitted.
    pub fn request(&self, source: &Path, cache_path: &Path, target: &TargetSpec) -> bool {
        let Some(guard) = self.pending.try_acquire(cache_path) else {
            log::debug!("Generation of {} already pending", cache_path.display());
            return false;
        };

        let source = source.to_path_buf();
        let target = *target;
        self.pool
            .submit(Box::new(move || run_detached(source, target, guard)));
        true
    }

    /// Make sure a rendition exists or is being produced, without displaying
    /// anything.
    pub fn warm(&self, source: &Path, target: &TargetSpec) -> Result<Lookup> {
        let lookup = self.lookup(source, target)?;
        if let Lookup::Miss(path) = &lookup {
            self.request(source, path, target);
        }
        Ok(lookup)
    }
}

impl fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCache")
            .field("dir", &self.dir)
            .field("pending", &self.pending)
            .finish()
    }
}

/// A cache entry is valid if its header can be read as an image.
pub fn is_valid_entry(path: &Path) -> bool {
    image::image_dimensions(path).is_ok()
}
