//! Recursive directory watching over native notification backends.
//!
//! Callers register root directories, read normalized [`FileEvent`]s and
//! backend errors from two queues, and close the watcher when done.
//!
//! # Architecture
//!
//! ```text
//! caller ── add/close ──> StreamWatcher ── start/restart/stop ──> NativeStream
//!                            |  (mutex: PathRegistry + stream state)     |
//!                            |                                          | raw batches
//!   events <── FileEvent ─── DispatchLoop <──────────────────────────────┘
//!   errors <── WatchError ──┘
//! ```
//!
//! - The first add starts the native stream and spawns the dispatch loop.
//! - Later adds are absorbed when an existing root covers them, otherwise
//!   the stream restarts with the enlarged root set.
//! - The dispatch loop drops the "created" record each backend emits for a
//!   root when the subscription begins, once per root.
//! - Both queues are zero-capacity. An event reader that stops draining
//!   stalls event delivery; backend errors are held by the loop until read
//!   and never hold back events. Close always completes regardless.

mod dispatch;
mod error;
mod event;
pub mod native;
mod notify_stream;
mod path_registry;
pub mod paths;
mod stream_watcher;

use std::path::Path;

use crossbeam_channel::Receiver;

pub use dispatch::SpuriousEventTracker;
pub use error::WatchError;
pub use event::FileEvent;
pub use native::{ChangeFlags, NativeStream, RawChangeRecord, StreamConfig, StreamFlags};
pub use notify_stream::NotifyStream;
pub use path_registry::PathRegistry;
pub use stream_watcher::{StreamWatcher, WatcherState};

use crate::config::WatcherConfig;

/// Caller-facing watcher contract, independent of the native backend.
pub trait Notify: Send + Sync {
    /// Watch `path` and everything beneath it.
    ///
    /// Idempotent for paths already covered by a registered root.
    fn add(&self, path: &Path) -> Result<(), WatchError>;

    /// The watcher's event queue. Every call returns a handle to the same
    /// queue; it disconnects once the watcher is closed.
    fn events(&self) -> Receiver<FileEvent>;

    /// Asynchronous backend failures.
    fn errors(&self) -> Receiver<WatchError>;

    /// Stop the backend and release both queues. Safe to call repeatedly.
    fn close(&self) -> Result<(), WatchError>;
}

/// Create a watcher on the platform backend with default settings.
pub fn new_watcher() -> Result<Box<dyn Notify>, WatchError> {
    new_watcher_with(&WatcherConfig::default())
}

/// Create a watcher on the platform backend.
pub fn new_watcher_with(config: &WatcherConfig) -> Result<Box<dyn Notify>, WatchError> {
    let stream = NotifyStream::new(config.stream_config())?;
    crate::debug_event!("watcher", "created", "{:?}", stream.config());
    Ok(Box::new(StreamWatcher::new(stream)))
}
