//! Error types for the watcher system.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
///
/// Cloneable so backend failures can be forwarded onto the caller's
/// error queue without losing the original value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Invalid stream configuration: {reason}")]
    Config { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Native stream error: {reason}")]
    Stream { reason: String },

    #[error("File system event error: {details}")]
    EventError { details: String },

    #[error("Invalid watch path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Watcher is closed")]
    Closed,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::EventError {
            details: e.to_string(),
        }
    }
}
