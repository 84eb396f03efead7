//! Watcher over a recursive [`NativeStream`].
//!
//! Owns the root registry, the stream start/restart protocol and the public
//! queues. A single mutex guards registry and stream; the dispatch loop only
//! takes it for the exact-match root lookup, and nothing blocks on a queue
//! while holding it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use super::dispatch::DispatchLoop;
use super::native::NativeStream;
use super::path_registry::PathRegistry;
use super::{FileEvent, Notify, WatchError, paths};

/// Lifecycle of the native stream, as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Unstarted,
    Running,
    Stopped,
}

enum StreamState {
    /// Queue senders wait here until the dispatch loop takes them.
    Unstarted {
        events_tx: Sender<FileEvent>,
        errors_tx: Sender<WatchError>,
    },
    /// Backend started but the dispatch loop could not be spawned. No root
    /// is committed; the next add restarts the backend and retries the spawn.
    Detached {
        events_tx: Sender<FileEvent>,
        errors_tx: Sender<WatchError>,
    },
    Running {
        /// Dropped on close; never sends.
        stop_tx: Sender<()>,
        dispatch: JoinHandle<()>,
    },
    Stopped,
}

impl StreamState {
    fn view(&self) -> WatcherState {
        match self {
            StreamState::Unstarted { .. } | StreamState::Detached { .. } => {
                WatcherState::Unstarted
            }
            StreamState::Running { .. } => WatcherState::Running,
            StreamState::Stopped => WatcherState::Stopped,
        }
    }
}

struct Inner<S> {
    stream: S,
    registry: PathRegistry,
    state: StreamState,
}

/// Recursive directory watcher driving a native stream.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use dirwatch::watcher::{Notify, NotifyStream, StreamConfig, StreamWatcher};
///
/// let stream = NotifyStream::new(StreamConfig::default())?;
/// let watcher = StreamWatcher::new(stream);
/// watcher.add(Path::new("/tmp/project"))?;
///
/// let events = watcher.events();
/// if let Ok(event) = events.recv() {
///     println!("changed: {}", event.path.display());
/// }
/// watcher.close()?;
/// # Ok::<(), dirwatch::watcher::WatchError>(())
/// ```
pub struct StreamWatcher<S: NativeStream> {
    inner: Arc<Mutex<Inner<S>>>,
    events_rx: Receiver<FileEvent>,
    errors_rx: Receiver<WatchError>,
}

impl<S: NativeStream> StreamWatcher<S> {
    /// Wrap a configured, unstarted stream. Nothing runs until the first add.
    pub fn new(stream: S) -> Self {
        // Zero capacity: every event is a direct handoff to a reader.
        let (events_tx, events_rx) = bounded(0);
        let (errors_tx, errors_rx) = bounded(0);

        Self {
            inner: Arc::new(Mutex::new(Inner {
                stream,
                registry: PathRegistry::new(),
                state: StreamState::Unstarted {
                    events_tx,
                    errors_tx,
                },
            })),
            events_rx,
            errors_rx,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.inner.lock().state.view()
    }

    /// Snapshot of the registered roots.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.inner.lock().registry.roots().to_vec()
    }

    /// Whether `path` is literally one of the registered roots.
    pub fn is_tracking_path(&self, path: &Path) -> bool {
        self.inner.lock().registry.is_tracking_path(path)
    }

    /// Spawn the dispatch loop over a started backend and commit `roots`.
    ///
    /// The loop gets clones of the queue senders. If it cannot be spawned the
    /// originals go back into `Detached` and the registry is left alone.
    fn launch(
        &self,
        inner: &mut Inner<S>,
        roots: Vec<PathBuf>,
        events_tx: Sender<FileEvent>,
        errors_tx: Sender<WatchError>,
    ) -> Result<StreamState, WatchError> {
        match self.spawn_dispatch(&inner.stream, events_tx.clone(), errors_tx.clone()) {
            Ok(running) => {
                inner.registry.commit(roots);
                Ok(running)
            }
            Err(e) => {
                inner.state = StreamState::Detached {
                    events_tx,
                    errors_tx,
                };
                Err(e)
            }
        }
    }

    fn spawn_dispatch(
        &self,
        stream: &S,
        events_tx: Sender<FileEvent>,
        errors_tx: Sender<WatchError>,
    ) -> Result<StreamState, WatchError> {
        if let Some(e) = injected_spawn_failure() {
            return Err(e);
        }

        let (stop_tx, stop) = bounded(0);
        let registry: Weak<Mutex<Inner<S>>> = Arc::downgrade(&self.inner);

        let dispatch = DispatchLoop {
            records: stream.records(),
            backend_errors: stream.errors(),
            stop,
            events: events_tx,
            errors: errors_tx,
            is_tracking: move |path: &Path| {
                registry
                    .upgrade()
                    .is_some_and(|inner| inner.lock().registry.is_tracking_path(path))
            },
        }
        .spawn()
        .map_err(|e| WatchError::InitFailed {
            reason: format!("failed to spawn dispatch loop: {e}"),
        })?;

        Ok(StreamState::Running { stop_tx, dispatch })
    }
}

impl<S: NativeStream> Notify for StreamWatcher<S> {
    fn add(&self, path: &Path) -> Result<(), WatchError> {
        let path = paths::absolutize(path)?;
        let mut inner = self.inner.lock();

        if matches!(inner.state, StreamState::Stopped) {
            return Err(WatchError::Closed);
        }

        let Some(roots) = inner.registry.with_candidate(&path) else {
            crate::debug_event!("watcher", "already covered", "{}", path.display());
            return Ok(());
        };

        // The backend sees the new root set before the registry does, so a
        // rejected start/restart leaves the registry untouched.
        let inner = &mut *inner;
        let state = std::mem::replace(&mut inner.state, StreamState::Stopped);
        let next = match state {
            StreamState::Stopped => return Err(WatchError::Closed),
            StreamState::Running { stop_tx, dispatch } => {
                if let Err(e) = inner.stream.restart(&roots) {
                    inner.state = StreamState::Running { stop_tx, dispatch };
                    return Err(e);
                }
                inner.registry.commit(roots);
                crate::debug_event!(
                    "watcher",
                    "restarted stream",
                    "{} roots",
                    inner.registry.len()
                );
                StreamState::Running { stop_tx, dispatch }
            }
            StreamState::Unstarted {
                events_tx,
                errors_tx,
            } => {
                if let Err(e) = inner.stream.start(&roots) {
                    inner.state = StreamState::Unstarted {
                        events_tx,
                        errors_tx,
                    };
                    return Err(e);
                }
                self.launch(inner, roots, events_tx, errors_tx)?
            }
            StreamState::Detached {
                events_tx,
                errors_tx,
            } => {
                if let Err(e) = inner.stream.restart(&roots) {
                    inner.state = StreamState::Detached {
                        events_tx,
                        errors_tx,
                    };
                    return Err(e);
                }
                self.launch(inner, roots, events_tx, errors_tx)?
            }
        };
        inner.state = next;

        crate::log_event!("watcher", "watching", "{}", path.display());
        Ok(())
    }

    fn events(&self) -> Receiver<FileEvent> {
        self.events_rx.clone()
    }

    fn errors(&self) -> Receiver<WatchError> {
        self.errors_rx.clone()
    }

    fn close(&self) -> Result<(), WatchError> {
        let (stopped, running) = {
            let mut inner = self.inner.lock();
            match std::mem::replace(&mut inner.state, StreamState::Stopped) {
                StreamState::Stopped => return Ok(()),
                // Dropping the unused senders disconnects both queues.
                StreamState::Unstarted { .. } | StreamState::Detached { .. } => {
                    (inner.stream.stop(), None)
                }
                StreamState::Running { stop_tx, dispatch } => {
                    (inner.stream.stop(), Some((stop_tx, dispatch)))
                }
            }
        };

        // Join outside the lock: the loop may be waiting on it for a root lookup.
        if let Some((stop_tx, dispatch)) = running {
            drop(stop_tx);
            if dispatch.join().is_err() {
                tracing::warn!("[watcher] dispatch loop panicked");
            }
        }

        crate::log_event!("watcher", "closed");
        stopped
    }
}

impl<S: NativeStream> Drop for StreamWatcher<S> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(not(test))]
fn injected_spawn_failure() -> Option<WatchError> {
    None
}

#[cfg(test)]
fn injected_spawn_failure() -> Option<WatchError> {
    let armed = tests::SPAWN_FAILURES.with(|n| {
        let left = n.get();
        n.set(left.saturating_sub(1));
        left > 0
    });
    armed.then(|| WatchError::InitFailed {
        reason: "failed to spawn dispatch loop".to_string(),
    })
}
