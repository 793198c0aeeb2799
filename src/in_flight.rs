//! Set of paths currently being processed.
//!
//! Claiming a path returns a guard; the path leaves the set when the guard is
//! dropped, whichever way processing ends.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically inserts `path` and returns its guard, or `None` if another
    /// pipeline already holds it.
    pub fn try_claim(&self, path: &Path) -> Option<InFlightGuard> {
        if !self.lock().insert(path.to_path_buf()) {
            return None;
        }
        Some(InFlightGuard {
            paths: self.paths.clone(),
            path: path.to_path_buf(),
        })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Membership of one path in an [`InFlightSet`].
#[derive(Debug)]
pub struct InFlightGuard {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl InFlightGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}
