//! Single-flight registry of cache files currently being generated
//!
//! One registry is shared by every cache store and manager in the process.
//! A path is present for exactly the span of one generation attempt; a second
//! attempt for the same path observes it and backs off.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static GLOBAL: Lazy<Arc<PendingRegistry>> = Lazy::new(|| Arc::new(PendingRegistry::new()));

#[derive(Default)]
pub struct PendingRegistry {
    pending: Mutex<HashSet<PathBuf>>,
}

impl PendingRegistry {
    /// A standalone registry, isolated from the rest of the process.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every cache built from configuration.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Test-and-insert `path`. Returns false if it is already in flight.
    pub fn try_insert(&self, path: &Path) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains(path) {
            return false;
        }
        pending.insert(path.to_path_buf())
    }

    pub fn release(&self, path: &Path) {
        self.pending.lock().remove(path);
    }

    /// Claim `path` for one generation attempt. The claim is released when the
    /// returned guard is dropped.
    pub fn try_acquire(self: &Arc<Self>, path: &Path) -> Option<PendingGuard> {
        if !self.try_insert(path) {
            return None;
        }
        Some(PendingGuard {
            registry: Arc::clone(self),
            path: path.to_path_buf(),
        })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.pending.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for PendingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// Exclusive claim on one cache path.
#[must_use = "dropping the guard releases the claim immediately"]
pub struct PendingGuard {
    registry: Arc<PendingRegistry>,
    path: PathBuf,
}

impl PendingGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for PendingGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PendingGuard").field(&self.path).finish()
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.release(&self.path);
    }
}
