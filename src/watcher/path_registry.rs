//! Registry of watched root directories with containment checks.
//!
//! Native watches are recursive, so a root covers its whole subtree.
//! The registry keeps the minimal set of roots: no entry is an ancestor
//! of another.

use std::path::{Path, PathBuf};

use super::paths;

/// Ordered set of watched root directories.
///
/// Not synchronized on its own; the watcher guards it with its mutex.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PathRegistry {
    roots: Vec<PathBuf>,
}

impl PathRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` is equal to or beneath an existing root.
    pub fn covers(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| paths::is_child_of(path, root))
    }

    /// Exact membership against the registered roots.
    ///
    /// Unlike [`covers`](Self::covers), descendants of a root do not match.
    pub fn is_tracking_path(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| root == path)
    }

    /// The root set that would result from adding `path`, or `None` if the
    /// path is already covered.
    ///
    /// Existing roots beneath `path` are dropped from the result since the
    /// new root's recursive watch subsumes them. Lets callers hand the new
    /// set to the backend before committing.
    pub fn with_candidate(&self, path: &Path) -> Option<Vec<PathBuf>> {
        if self.covers(path) {
            return None;
        }
        let mut roots: Vec<PathBuf> = self
            .roots
            .iter()
            .filter(|root| !paths::is_child_of(root, path))
            .cloned()
            .collect();
        roots.push(path.to_path_buf());
        Some(roots)
    }

    /// Replace the root set with one produced by [`with_candidate`](Self::with_candidate).
    pub fn commit(&mut self, roots: Vec<PathBuf>) {
        self.roots = roots;
    }

    /// Add a root unless it is already covered. Returns whether it was added.
    pub fn add(&mut self, path: &Path) -> bool {
        match self.with_candidate(path) {
            Some(roots) => {
                self.commit(roots);
                true
            }
            None => false,
        }
    }

    /// Registered roots in insertion order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
