//! Background loop turning raw backend records into [`FileEvent`]s.
//!
//! The loop owns the senders of both public queues. It ends when the stop
//! signal disconnects or the backend's record channel is exhausted; the
//! queues disconnect with it, which is how callers observe shutdown.
//!
//! Backend errors are buffered inside the loop and offered to the error
//! queue alongside record intake, so a caller that only reads events is
//! never stalled by an error nobody collects.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, select};

use super::native::RawChangeRecord;
use super::{FileEvent, WatchError, paths};

/// Backend errors held for a reader that has not drained the error queue.
const MAX_PENDING_ERRORS: usize = 1024;

/// Paths whose startup "created" record has already been swallowed.
///
/// Only grows. Lives as long as one dispatch loop.
#[derive(Debug, Default)]
pub struct SpuriousEventTracker {
    suppressed: HashSet<PathBuf>,
}

impl SpuriousEventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suppressed(&self, path: &Path) -> bool {
        self.suppressed.contains(path)
    }

    /// Record a suppression. Returns false if the path was already recorded.
    pub fn mark(&mut self, path: PathBuf) -> bool {
        self.suppressed.insert(path)
    }

    pub fn len(&self) -> usize {
        self.suppressed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suppressed.is_empty()
    }
}

/// Everything the dispatch loop reads from and writes to.
pub(crate) struct DispatchLoop<F> {
    pub records: Receiver<Vec<RawChangeRecord>>,
    pub backend_errors: Receiver<WatchError>,
    /// Never carries a value; disconnects when the watcher closes.
    pub stop: Receiver<()>,
    pub events: Sender<FileEvent>,
    pub errors: Sender<WatchError>,
    /// Exact-match query against the registered roots.
    pub is_tracking: F,
}

impl<F> DispatchLoop<F>
where
    F: Fn(&Path) -> bool + Send + 'static,
{
    /// Run the loop on its own named thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("dirwatch-dispatch".to_string())
            .spawn(move || self.run())
    }

    pub fn run(self) {
        let mut tracker = SpuriousEventTracker::new();
        let mut pending: VecDeque<WatchError> = VecDeque::new();
        let mut backend_errors_open = true;

        crate::debug_event!("watcher", "dispatch loop started");

        loop {
            if self.is_stopping() {
                crate::debug_event!("watcher", "dispatch loop stopped");
                break;
            }

            let mut sel = Select::new();
            let stop_op = sel.recv(&self.stop);
            let records_op = sel.recv(&self.records);
            let errors_in_op = backend_errors_open.then(|| sel.recv(&self.backend_errors));
            // Backend errors queue up here; records keep flowing while the
            // error queue goes unread.
            let errors_out_op = (!pending.is_empty()).then(|| sel.send(&self.errors));

            let oper = sel.select();
            let index = oper.index();

            if index == stop_op {
                let _ = oper.recv(&self.stop);
                crate::debug_event!("watcher", "dispatch loop stopped");
                break;
            } else if index == records_op {
                match oper.recv(&self.records) {
                    Ok(batch) => {
                        if !self.dispatch_batch(batch, &mut tracker) {
                            break;
                        }
                    }
                    Err(_) => {
                        crate::debug_event!("watcher", "backend closed");
                        break;
                    }
                }
            } else if Some(index) == errors_in_op {
                match oper.recv(&self.backend_errors) {
                    Ok(err) => {
                        if pending.len() >= MAX_PENDING_ERRORS {
                            pending.pop_front();
                            tracing::warn!("[watcher] error queue unread, dropping oldest error");
                        }
                        pending.push_back(err);
                    }
                    Err(_) => backend_errors_open = false,
                }
            } else if Some(index) == errors_out_op {
                // Only offered while `pending` is non-empty.
                if let Some(err) = pending.pop_front() {
                    let delivered = oper.send(&self.errors, err).is_ok();
                    if !delivered {
                        pending.clear();
                    }
                }
            }
        }
    }

    /// Publish one batch. Returns false once the watcher is stopping.
    fn dispatch_batch(
        &self,
        batch: Vec<RawChangeRecord>,
        tracker: &mut SpuriousEventTracker,
    ) -> bool {
        for record in batch {
            let path = paths::normalize_event_path(&record.path);

            // Backends announce each watched root as "created" when the
            // subscription begins. Drop that once per root.
            if record.is_created() && !tracker.is_suppressed(&path) && (self.is_tracking)(&path)
            {
                crate::debug_event!(
                    "watcher",
                    "suppressed startup event",
                    "{}",
                    path.display()
                );
                tracker.mark(path);
                continue;
            }

            if !self.deliver(&self.events, FileEvent::new(path)) {
                return false;
            }
        }
        true
    }

    /// Hand an event to the caller, giving up if the stop signal fires first.
    fn deliver(&self, queue: &Sender<FileEvent>, value: FileEvent) -> bool {
        if self.is_stopping() {
            return false;
        }
        select! {
            send(queue, value) -> res => res.is_ok(),
            recv(self.stop) -> _ => false,
        }
    }

    fn is_stopping(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }
}
