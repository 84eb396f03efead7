//! Normalized change event delivered to callers.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// A change somewhere under a watched root.
///
/// The path is always absolute and lexically clean.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileEvent {
    pub path: PathBuf,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
