//! Lookup orchestrator bound to a display item
//!
//! A [`CachingImageManager`] watches one [`ImageItem`]. Whenever the source
//! path, the item, or the item's geometry changes it resolves the cache file
//! for the item's current size and fill-mode. A hit is shown directly; on a
//! miss the original source is shown in the meantime and generation is kicked
//! off in the background. The manager never waits for generation: a later
//! update finds the file once it exists.

use crate::cache::{is_valid_entry, ImageCache};
use crate::key::derive_key;
use crate::location::{resolve_cache_location, CacheDir, CacheLocation};
use crate::target::{FillMode, TargetSpec};
use crate::CacheConfig;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Handle returned when registering a callback, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

pub type GeometryListener = Box<dyn Fn() + Send + Sync>;

/// The visual element an image is displayed in.
///
/// Implemented by the GUI layer. Sizes are logical units, independent of the
/// display scale factor.
pub trait ImageItem: Send + Sync {
    fn width(&self) -> f64;
    fn height(&self) -> f64;
    /// Fill-mode name as the GUI layer spells it, e.g. `PreserveAspectFit`.
    /// Names other than the two aspect-preserving modes mean stretch.
    fn fill_mode(&self) -> String;

    /// Pixel size the item should decode its source at.
    fn set_source_size(&self, width: u32, height: u32);

    /// Display `source`.
    fn set_source(&self, source: &Path);

    /// Call `listener` whenever width or height changes.
    fn connect_geometry_changed(&self, listener: GeometryListener) -> ConnectionId;
    fn disconnect(&self, id: ConnectionId);
}

/// Property change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    ItemChanged,
    CacheDirChanged,
    PathChanged,
    /// The candidate cache file for the current source and size changed.
    CachePathChanged(CacheLocation),
    WarmOnlyChanged(bool),
}

type Listener = Arc<dyn Fn(&ManagerEvent) + Send + Sync>;

struct Binding {
    item: Arc<dyn ImageItem>,
    connection: ConnectionId,
}

struct State {
    binding: Option<Binding>,
    cache: ImageCache,
    path: PathBuf,
    cache_path: Option<CacheLocation>,
    warm_only: bool,
    /// Source currently being updated; nested updates for it are ignored.
    updating: Option<PathBuf>,
}

pub struct CachingImageManager {
    this: Weak<CachingImageManager>,
    state: Mutex<State>,
    listeners: Mutex<Vec<(ConnectionId, Listener)>>,
    next_listener: AtomicU64,
}

impl CachingImageManager {
    /// Cache keys use the logical item size so renditions warmed on one output
    /// match what is requested on another, whatever their scale factors.
    const EFFECTIVE_SCALE: f64 = 1.0;

    pub fn new(cache: ImageCache) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            state: Mutex::new(State {
                binding: None,
                cache,
                path: PathBuf::new(),
                cache_path: None,
                warm_only: false,
                updating: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        })
    }

    /// Manager generating on rayon's global pool, claiming cache files
    /// through the process-wide pending registry.
    pub fn from_config(config: &CacheConfig) -> Arc<Self> {
        Self::with_config(ImageCache::from_config(config), config)
    }

    /// Manager on a shared `cache`, with the directory and mode from `config`.
    pub fn with_config(cache: ImageCache, config: &CacheConfig) -> Arc<Self> {
        let manager = Self::new(cache.with_dir(CacheDir::new(config.cache_dir.clone())));
        manager.state.lock().warm_only = config.warm_only;
        manager
    }

    pub fn connect<F>(&self, listener: F) -> ConnectionId
    where
        F: Fn(&ManagerEvent) + Send + Sync + 'static,
    {
        let id = ConnectionId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
    }

    fn emit(&self, event: ManagerEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn item(&self) -> Option<Arc<dyn ImageItem>> {
        self.state
            .lock()
            .binding
            .as_ref()
            .map(|binding| Arc::clone(&binding.item))
    }

    /// Bind to `item`, dropping the geometry subscription on the previous one,
    /// and run an update against it.
    pub fn set_item(&self, item: Option<Arc<dyn ImageItem>>) {
        let previous = {
            let mut state = self.state.lock();
            let unchanged = match (&state.binding, &item) {
                (Some(binding), Some(item)) => {
                    std::ptr::addr_eq(Arc::as_ptr(&binding.item), Arc::as_ptr(item))
                }
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return;
            }
            state.binding.take()
        };

        if let Some(previous) = previous {
            previous.item.disconnect(previous.connection);
        }

        let Some(item) = item else {
            self.emit(ManagerEvent::ItemChanged);
            return;
        };

        let this = self.this.clone();
        let connection = item.connect_geometry_changed(Box::new(move || {
            if let Some(manager) = this.upgrade() {
                manager.update_source();
            }
        }));
        self.state.lock().binding = Some(Binding {
            item,
            connection,
        });

        self.emit(ManagerEvent::ItemChanged);
        self.update_source();
    }

    /// Called by the GUI layer for geometry changes it delivers by other means
    /// than the item subscription.
    pub fn geometry_changed(&self) {
        self.update_source();
    }

    pub fn cache_dir(&self) -> CacheDir {
        self.state.lock().cache.dir().clone()
    }

    /// Change the cache directory. Takes effect on the next update.
    pub fn set_cache_dir(&self, dir: impl Into<CacheDir>) {
        let dir = dir.into();
        {
            let mut state = self.state.lock();
            if *state.cache.dir() == dir {
                return;
            }
            state.cache = state.cache.with_dir(dir);
        }
        self.emit(ManagerEvent::CacheDirChanged);
    }

    pub fn path(&self) -> PathBuf {
        self.state.lock().path.clone()
    }

    pub fn set_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        {
            let mut state = self.state.lock();
            if state.path == path {
                return;
            }
            state.path = path.clone();
        }
        self.emit(ManagerEvent::PathChanged);

        if !path.as_os_str().is_empty() {
            self.update_source_for(&path);
        }
    }

    /// Current candidate cache file, local or not.
    pub fn cache_path(&self) -> Option<CacheLocation> {
        self.state.lock().cache_path.clone()
    }

    pub fn warm_only(&self) -> bool {
        self.state.lock().warm_only
    }

    /// In warm-only mode the cache is filled but nothing is ever displayed.
    pub fn set_warm_only(&self, warm_only: bool) {
        {
            let mut state = self.state.lock();
            if state.warm_only == warm_only {
                return;
            }
            state.warm_only = warm_only;
        }
        self.emit(ManagerEvent::WarmOnlyChanged(warm_only));
        self.update_source();
    }

    pub fn update_source(&self) {
        let path = self.state.lock().path.clone();
        self.update_source_for(&path);
    }

    /// Resolve and publish the cache file for `path` at the item's current
    /// size, scheduling generation on a miss.
    ///
    /// Silently does nothing for an empty path, a source that is not a
    /// regular file, a zero-area item or when no item is bound.
    pub fn update_source_for(&self, path: &Path) {
        if path.as_os_str().is_empty() {
            return;
        }

        let (item, cache, warm_only) = {
            let mut state = self.state.lock();
            if state.updating.as_deref() == Some(path) {
                return;
            }
            state.updating = Some(path.to_path_buf());
            (
                state.binding.as_ref().map(|binding| Arc::clone(&binding.item)),
                state.cache.clone(),
                state.warm_only,
            )
        };
        let _marker = UpdateMarker {
            state: &self.state,
            path,
        };

        let Some(item) = item else {
            return;
        };
        let (width, height) = effective_size(item.as_ref());
        let Some(key) = derive_key(path) else {
            return;
        };
        let target = TargetSpec::new(width, height, FillMode::from_name(&item.fill_mode()));
        if target.is_empty() {
            return;
        }

        let location = resolve_cache_location(cache.dir(), &key, &target);
        let changed = {
            let mut state = self.state.lock();
            if state.cache_path.as_ref() == Some(&location) {
                false
            } else {
                state.cache_path = Some(location.clone());
                true
            }
        };
        if changed {
            self.emit(ManagerEvent::CachePathChanged(location.clone()));
        }

        let cache_file = match location.to_local_path() {
            Ok(cache_file) => cache_file,
            Err(e) => {
                log::warn!("{}", e);
                return;
            }
        };

        if is_valid_entry(cache_file) {
            log::debug!("Cache hit for {}: {}", path.display(), cache_file.display());
            if !warm_only {
                item.set_source(cache_file);
            }
        } else {
            if !warm_only {
                item.set_source(path);
            }
            cache.request(path, cache_file, &target);
        }
    }
}

impl fmt::Debug for CachingImageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CachingImageManager")
            .field("cache", &state.cache)
            .field("path", &state.path)
            .field("cache_path", &state.cache_path)
            .field("warm_only", &state.warm_only)
            .field("has_item", &state.binding.is_some())
            .finish()
    }
}

impl Drop for CachingImageManager {
    fn drop(&mut self) {
        if let Some(binding) = self.state.get_mut().binding.take() {
            binding.item.disconnect(binding.connection);
        }
    }
}

/// Clears the in-progress marker for `path` when an update ends.
struct UpdateMarker<'a> {
    state: &'a Mutex<State>,
    path: &'a Path,
}

impl Drop for UpdateMarker<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.updating.as_deref() == Some(self.path) {
            state.updating = None;
        }
    }
}

/// Item size in pixels at the effective scale, written back as the item's
/// source size.
fn effective_size(item: &dyn ImageItem) -> (u32, u32) {
    let scale = CachingImageManager::EFFECTIVE_SCALE;
    // Float to int casts saturate: negative and NaN become 0
    let width = (item.width() * scale).round() as u32;
    let height = (item.height() * scale).round() as u32;
    item.set_source_size(width, height);
    (width, height)
}
