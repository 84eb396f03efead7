//! Contract between the watcher and a native notification backend.
//!
//! A backend watches a set of root paths and reports batches of raw change
//! records. The watcher drives it through [`NativeStream::start`],
//! [`NativeStream::restart`] and [`NativeStream::stop`] and drains its output
//! channels from the dispatch loop.

use std::path::PathBuf;
use std::time::Duration;

use bitflags::bitflags;
use crossbeam_channel::Receiver;

use super::WatchError;

/// Upper bound for batching latency. Anything longer is almost certainly a
/// unit mistake (seconds passed as milliseconds).
pub const MAX_LATENCY: Duration = Duration::from_secs(60);

bitflags! {
    /// Per-record change flags reported by the backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChangeFlags: u32 {
        const ITEM_CREATED = 1 << 0;
        const ITEM_REMOVED = 1 << 1;
        const ITEM_MODIFIED = 1 << 2;
        const ITEM_RENAMED = 1 << 3;
        const ITEM_INODE_META = 1 << 4;
        const ITEM_IS_FILE = 1 << 5;
        const ITEM_IS_DIR = 1 << 6;
        /// Backend dropped events under this path; a rescan is required.
        const MUST_SCAN_SUBDIRS = 1 << 7;
        const ROOT_CHANGED = 1 << 8;
    }
}

bitflags! {
    /// Stream creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StreamFlags: u32 {
        /// Report individual files instead of their parent directories.
        const FILE_EVENTS = 1 << 0;
        /// Watch whole subtrees under each root.
        const RECURSIVE = 1 << 1;
    }
}

impl StreamFlags {
    /// The flag set used for recursive, file-granular watching.
    pub fn full_recursive() -> Self {
        StreamFlags::FILE_EVENTS | StreamFlags::RECURSIVE
    }
}

impl Default for StreamFlags {
    fn default() -> Self {
        Self::full_recursive()
    }
}

/// Backend configuration fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// How long the backend waits to coalesce records into one batch.
    pub latency: Duration,
    pub flags: StreamFlags,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(1),
            flags: StreamFlags::full_recursive(),
        }
    }
}

impl StreamConfig {
    /// Reject configurations the watcher cannot honor.
    ///
    /// Root containment assumes recursive watches, so `RECURSIVE` is required.
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.latency > MAX_LATENCY {
            return Err(WatchError::Config {
                reason: format!(
                    "latency {:?} exceeds maximum of {:?}",
                    self.latency, MAX_LATENCY
                ),
            });
        }
        if !self.flags.contains(StreamFlags::RECURSIVE) {
            return Err(WatchError::Config {
                reason: "stream flags must include RECURSIVE".to_string(),
            });
        }
        Ok(())
    }
}

/// One raw record as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChangeRecord {
    /// Backend path, possibly relative to the filesystem root.
    pub path: PathBuf,
    pub flags: ChangeFlags,
}

impl RawChangeRecord {
    pub fn new(path: impl Into<PathBuf>, flags: ChangeFlags) -> Self {
        Self {
            path: path.into(),
            flags,
        }
    }

    pub fn is_created(&self) -> bool {
        self.flags.contains(ChangeFlags::ITEM_CREATED)
    }
}

/// A native change-notification stream.
///
/// Implementations own whatever OS resources back the watch. The records
/// channel must disconnect once the stream is stopped and drained, which is
/// how the dispatch loop learns the backend is gone.
pub trait NativeStream: Send + 'static {
    /// Begin watching `paths`. Called once, with a non-empty set.
    fn start(&mut self, paths: &[PathBuf]) -> Result<(), WatchError>;

    /// Replace the watched set with `paths` while running.
    ///
    /// Coverage must not lapse during the switch. Implementations may
    /// overlap the old and new subscriptions briefly, so a change under a
    /// root present in both sets can be reported twice.
    fn restart(&mut self, paths: &[PathBuf]) -> Result<(), WatchError>;

    /// Stop watching and release the backend.
    fn stop(&mut self) -> Result<(), WatchError>;

    /// Batches of raw records.
    fn records(&self) -> Receiver<Vec<RawChangeRecord>>;

    /// Asynchronous backend failures.
    fn errors(&self) -> Receiver<WatchError>;
}
