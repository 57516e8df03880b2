//! Watch registry: the path <-> watch id mapping
//!
//! The registry is the single source of truth for which directory a watch id
//! refers to. Every mutation goes through one mutex, and every mutating call
//! issues exactly one request to the backend (except `forget`, which records
//! a removal the kernel already made).

use crate::error::{Result, WatchError};
use crate::event::WatchId;
use crate::platform::WatchBackend;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Maps {
    by_path: HashMap<PathBuf, WatchId>,
    by_id: HashMap<WatchId, PathBuf>,
}

impl Maps {
    /// Insert keeping the mapping a bijection
    fn insert(&mut self, path: PathBuf, id: WatchId) {
        // The path may have been watched under another id (recreated directory)
        if let Some(old_id) = self.by_path.get(&path).copied() {
            if old_id != id {
                self.by_id.remove(&old_id);
            }
        }

        // The id may have been handed to another path (same inode, new name)
        if let Some(old_path) = self.by_id.get(&id) {
            if *old_path != path {
                self.by_path.remove(old_path);
            }
        }

        self.by_id.insert(id, path.clone());
        self.by_path.insert(path, id);
    }

    fn remove_path(&mut self, path: &Path) -> Option<WatchId> {
        let id = self.by_path.remove(path)?;
        self.by_id.remove(&id);
        Some(id)
    }
}

/// Bidirectional mapping between watched directories and watch ids
pub struct WatchRegistry {
    backend: Arc<dyn WatchBackend>,
    maps: Mutex<Maps>,
}

impl WatchRegistry {
    /// Create an empty registry issuing requests to `backend`
    pub fn new(backend: Arc<dyn WatchBackend>) -> Self {
        Self {
            backend,
            maps: Mutex::new(Maps::default()),
        }
    }

    /// Watch `path` and record it
    ///
    /// Re-registering a known path asks the backend again and reconciles
    /// both directions with whatever id it returns.
    pub fn register(&self, path: &Path) -> Result<WatchId> {
        let mut maps = self.maps.lock();

        let id = self
            .backend
            .add_watch(path)
            .map_err(|source| WatchError::WatchCreation {
                path: path.to_path_buf(),
                source,
            })?;

        maps.insert(path.to_path_buf(), id);
        debug!("Watching {} ({})", path.display(), id);
        Ok(id)
    }

    /// Stop watching `path`
    ///
    /// A backend failure (watch already gone) is logged, not returned.
    pub fn unregister(&self, path: &Path) -> Result<()> {
        let mut maps = self.maps.lock();

        let id = maps
            .remove_path(path)
            .ok_or_else(|| WatchError::NotRegistered(path.to_path_buf()))?;

        if let Err(e) = self.backend.remove_watch(id) {
            debug!("Removing {} for {} failed: {}", id, path.display(), e);
        } else {
            debug!("Stopped watching {} ({})", path.display(), id);
        }
        Ok(())
    }

    /// Unregister `root` and every registered directory below it
    ///
    /// Returns how many watches were removed.
    pub fn unregister_tree(&self, root: &Path) -> usize {
        let mut maps = self.maps.lock();

        let doomed: Vec<PathBuf> = maps
            .by_path
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect();

        for path in &doomed {
            if let Some(id) = maps.remove_path(path) {
                if let Err(e) = self.backend.remove_watch(id) {
                    debug!("Removing {} for {} failed: {}", id, path.display(), e);
                }
            }
        }

        doomed.len()
    }

    /// Drop the mapping for a watch the kernel has already released
    pub fn forget(&self, id: WatchId) -> Option<PathBuf> {
        let mut maps = self.maps.lock();
        let path = maps.by_id.remove(&id)?;
        maps.by_path.remove(&path);
        debug!("Watch {} for {} released by kernel", id, path.display());
        Some(path)
    }

    /// Directory watched under `id`, if any
    pub fn resolve(&self, id: WatchId) -> Option<PathBuf> {
        self.maps.lock().by_id.get(&id).cloned()
    }

    /// Watch id for `path`, if registered
    pub fn watch_id(&self, path: &Path) -> Option<WatchId> {
        self.maps.lock().by_path.get(path).copied()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.maps.lock().by_path.contains_key(path)
    }

    /// Number of active watches
    pub fn len(&self) -> usize {
        self.maps.lock().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all watched directories, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.maps.lock().by_path.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("watches", &self.len())
            .finish()
    }
}
