//! [`NativeStream`] backed by the platform's recommended `notify` watcher.
//!
//! FSEvents on macOS, inotify on Linux, ReadDirectoryChangesW on Windows.
//! Records coming out of the notify callback are grouped by a batcher thread:
//! a batch opens on the first record and closes `latency` later.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::WatchError;
use super::native::{ChangeFlags, NativeStream, RawChangeRecord, StreamConfig, StreamFlags};

pub struct NotifyStream {
    config: StreamConfig,
    watcher: Option<RecommendedWatcher>,
    stopped: bool,
    /// Feeds the batcher; cloned into every notify callback.
    raw_tx: Option<Sender<RawChangeRecord>>,
    /// Handed to the batcher on start.
    raw_rx: Option<Receiver<RawChangeRecord>>,
    batch_tx: Option<Sender<Vec<RawChangeRecord>>>,
    batch_rx: Receiver<Vec<RawChangeRecord>>,
    errors_tx: Option<Sender<WatchError>>,
    errors_rx: Receiver<WatchError>,
}

impl NotifyStream {
    /// Configure a stream without starting it.
    pub fn new(config: StreamConfig) -> Result<Self, WatchError> {
        config.validate()?;

        let (raw_tx, raw_rx) = unbounded();
        let (batch_tx, batch_rx) = unbounded();
        let (errors_tx, errors_rx) = unbounded();

        Ok(Self {
            config,
            watcher: None,
            stopped: false,
            raw_tx: Some(raw_tx),
            raw_rx: Some(raw_rx),
            batch_tx: Some(batch_tx),
            batch_rx,
            errors_tx: Some(errors_tx),
            errors_rx,
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Build a notify watcher that feeds this stream and watch every path.
    fn build_watcher(&self, paths: &[PathBuf]) -> Result<RecommendedWatcher, WatchError> {
        let (Some(raw_tx), Some(errors_tx)) = (self.raw_tx.clone(), self.errors_tx.clone()) else {
            return Err(WatchError::Stream {
                reason: "stream has been stopped".to_string(),
            });
        };
        let file_events = self.config.flags.contains(StreamFlags::FILE_EVENTS);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for record in records_from_event(&event, file_events) {
                        let _ = raw_tx.send(record);
                    }
                }
                Err(e) => {
                    let _ = errors_tx.send(WatchError::from(e));
                }
            }
        })
        .map_err(|e| WatchError::InitFailed {
            reason: e.to_string(),
        })?;

        let mode = if self.config.flags.contains(StreamFlags::RECURSIVE) {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        for path in paths {
            watcher
                .watch(path, mode)
                .map_err(|e| WatchError::PathWatchFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            crate::debug_event!("stream", "watching", "{}", path.display());
        }

        Ok(watcher)
    }
}

impl NativeStream for NotifyStream {
    fn start(&mut self, paths: &[PathBuf]) -> Result<(), WatchError> {
        if self.stopped {
            return Err(WatchError::Stream {
                reason: "cannot start a stopped stream".to_string(),
            });
        }
        if self.watcher.is_some() {
            return Err(WatchError::Stream {
                reason: "stream already started".to_string(),
            });
        }

        let watcher = self.build_watcher(paths)?;

        let (Some(raw_rx), Some(batch_tx)) = (self.raw_rx.take(), self.batch_tx.take()) else {
            return Err(WatchError::Stream {
                reason: "batcher already consumed".to_string(),
            });
        };
        let latency = self.config.latency;
        thread::Builder::new()
            .name("dirwatch-batcher".to_string())
            .spawn(move || run_batcher(raw_rx, batch_tx, latency))
            .map_err(|e| WatchError::InitFailed {
                reason: format!("failed to spawn batcher: {e}"),
            })?;

        self.watcher = Some(watcher);
        crate::debug_event!("stream", "started", "{} roots", paths.len());
        Ok(())
    }

    fn restart(&mut self, paths: &[PathBuf]) -> Result<(), WatchError> {
        if self.watcher.is_none() {
            return Err(WatchError::Stream {
                reason: "cannot restart a stream that is not running".to_string(),
            });
        }

        // The old watcher keeps running if the new one cannot be built. Both
        // feed the raw channel until the swap, so a change under a root in
        // both sets may be reported twice.
        let watcher = self.build_watcher(paths)?;
        self.watcher = Some(watcher);
        crate::debug_event!("stream", "restarted", "{} roots", paths.len());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WatchError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        // Dropping the watcher drops its callback and with it the last raw
        // sender clones; the batcher then drains and disconnects batches.
        self.watcher = None;
        self.raw_tx = None;
        self.raw_rx = None;
        self.batch_tx = None;
        self.errors_tx = None;

        crate::debug_event!("stream", "stopped");
        Ok(())
    }

    fn records(&self) -> Receiver<Vec<RawChangeRecord>> {
        self.batch_rx.clone()
    }

    fn errors(&self) -> Receiver<WatchError> {
        self.errors_rx.clone()
    }
}

/// Group records arriving within `latency` of the first one into a batch.
fn run_batcher(
    raw_rx: Receiver<RawChangeRecord>,
    batch_tx: Sender<Vec<RawChangeRecord>>,
    latency: Duration,
) {
    while let Ok(first) = raw_rx.recv() {
        let mut batch = vec![first];
        let deadline = Instant::now() + latency;

        let disconnected = loop {
            match raw_rx.recv_deadline(deadline) {
                Ok(record) => batch.push(record),
                Err(RecvTimeoutError::Timeout) => break false,
                Err(RecvTimeoutError::Disconnected) => break true,
            }
        };

        if batch_tx.send(batch).is_err() || disconnected {
            return;
        }
    }
}

/// Translate one notify event into raw records, one per path.
///
/// Access events are not changes and produce nothing. Without file-granular
/// events the record points at the containing directory.
fn records_from_event(event: &Event, file_events: bool) -> Vec<RawChangeRecord> {
    let Some(mut flags) = flags_for_kind(&event.kind) else {
        return Vec::new();
    };
    if event.need_rescan() {
        flags |= ChangeFlags::MUST_SCAN_SUBDIRS;
    }

    event
        .paths
        .iter()
        .map(|path| {
            let path = if file_events {
                path.clone()
            } else {
                path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone())
            };
            RawChangeRecord::new(path, flags)
        })
        .collect()
}

fn flags_for_kind(kind: &EventKind) -> Option<ChangeFlags> {
    let flags = match kind {
        EventKind::Access(_) => return None,
        EventKind::Create(CreateKind::File) => {
            ChangeFlags::ITEM_CREATED | ChangeFlags::ITEM_IS_FILE
        }
        EventKind::Create(CreateKind::Folder) => {
            ChangeFlags::ITEM_CREATED | ChangeFlags::ITEM_IS_DIR
        }
        EventKind::Create(_) => ChangeFlags::ITEM_CREATED,
        EventKind::Remove(RemoveKind::File) => {
            ChangeFlags::ITEM_REMOVED | ChangeFlags::ITEM_IS_FILE
        }
        EventKind::Remove(RemoveKind::Folder) => {
            ChangeFlags::ITEM_REMOVED | ChangeFlags::ITEM_IS_DIR
        }
        EventKind::Remove(_) => ChangeFlags::ITEM_REMOVED,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeFlags::ITEM_RENAMED,
        EventKind::Modify(ModifyKind::Metadata(_)) => ChangeFlags::ITEM_INODE_META,
        EventKind::Modify(_) | EventKind::Any => ChangeFlags::ITEM_MODIFIED,
        EventKind::Other => ChangeFlags::empty(),
    };
    Some(flags)
}
