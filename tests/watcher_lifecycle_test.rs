//! Lifecycle tests for `StreamWatcher` against a scripted in-memory backend.
//!
//! The scripted stream records every start/restart/stop call and lets the
//! test push raw batches and backend errors as if the OS produced them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use dirwatch::watcher::{
    ChangeFlags, FileEvent, NativeStream, Notify, RawChangeRecord, StreamWatcher, WatchError,
    WatcherState,
};
use parking_lot::Mutex;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Start(Vec<PathBuf>),
    Restart(Vec<PathBuf>),
    Stop,
}

struct ScriptedStream {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_next: Arc<Mutex<Option<WatchError>>>,
    records_rx: Receiver<Vec<RawChangeRecord>>,
    errors_rx: Receiver<WatchError>,
}

/// Test-side handle onto a `ScriptedStream`.
struct Backend {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_next: Arc<Mutex<Option<WatchError>>>,
    records_tx: Sender<Vec<RawChangeRecord>>,
    errors_tx: Sender<WatchError>,
}

impl Backend {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn restarts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Restart(_)))
            .count()
    }

    fn emit(&self, records: Vec<RawChangeRecord>) {
        self.records_tx.send(records).unwrap();
    }

    fn fail_next(&self, reason: &str) {
        *self.fail_next.lock() = Some(WatchError::Stream {
            reason: reason.to_string(),
        });
    }
}

fn scripted() -> (ScriptedStream, Backend) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let fail_next = Arc::new(Mutex::new(None));
    let (records_tx, records_rx) = unbounded();
    let (errors_tx, errors_rx) = unbounded();

    (
        ScriptedStream {
            calls: Arc::clone(&calls),
            fail_next: Arc::clone(&fail_next),
            records_rx,
            errors_rx,
        },
        Backend {
            calls,
            fail_next,
            records_tx,
            errors_tx,
        },
    )
}

impl NativeStream for ScriptedStream {
    fn start(&mut self, paths: &[PathBuf]) -> Result<(), WatchError> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        self.calls.lock().push(Call::Start(paths.to_vec()));
        Ok(())
    }

    fn restart(&mut self, paths: &[PathBuf]) -> Result<(), WatchError> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        self.calls.lock().push(Call::Restart(paths.to_vec()));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WatchError> {
        self.calls.lock().push(Call::Stop);
        Ok(())
    }

    fn records(&self) -> Receiver<Vec<RawChangeRecord>> {
        self.records_rx.clone()
    }

    fn errors(&self) -> Receiver<WatchError> {
        self.errors_rx.clone()
    }
}

fn watcher() -> (StreamWatcher<ScriptedStream>, Backend) {
    let (stream, backend) = scripted();
    (StreamWatcher::new(stream), backend)
}

fn created(path: &str) -> RawChangeRecord {
    RawChangeRecord::new(path, ChangeFlags::ITEM_CREATED)
}

fn paths(list: &[&str]) -> Vec<PathBuf> {
    list.iter().map(PathBuf::from).collect()
}

#[test]
fn test_new_watcher_is_unstarted() {
    let (watcher, backend) = watcher();

    assert_eq!(watcher.state(), WatcherState::Unstarted);
    assert!(watcher.roots().is_empty());
    assert!(backend.calls().is_empty());
}

#[test]
fn test_first_add_starts_stream() {
    let (watcher, backend) = watcher();

    watcher.add(Path::new("/a")).unwrap();

    assert_eq!(watcher.state(), WatcherState::Running);
    assert_eq!(watcher.roots(), paths(&["/a"]));
    assert_eq!(backend.calls(), vec![Call::Start(paths(&["/a"]))]);
}

#[test]
fn test_descendant_add_is_absorbed() {
    let (watcher, backend) = watcher();

    watcher.add(Path::new("/a")).unwrap();
    watcher.add(Path::new("/a/b")).unwrap();
    watcher.add(Path::new("/a/b/c")).unwrap();
    watcher.add(Path::new("/a")).unwrap();

    assert_eq!(watcher.roots(), paths(&["/a"]));
    assert_eq!(backend.calls(), vec![Call::Start(paths(&["/a"]))]);
}

#[test]
fn test_disjoint_add_restarts_once() {
    let (watcher, backend) = watcher();

    watcher.add(Path::new("/a")).unwrap();
    watcher.add(Path::new("/b")).unwrap();

    assert_eq!(watcher.roots(), paths(&["/a", "/b"]));
    assert_eq!(
        backend.calls(),
        vec![
            Call::Start(paths(&["/a"])),
            Call::Restart(paths(&["/a", "/b"])),
        ]
    );
}

#[test]
fn test_one_restart_per_distinct_uncovered_path() {
    let (watcher, backend) = watcher();

    for path in ["/a", "/b", "/b/x", "/c", "/a/y/z", "/d", "/c"] {
        watcher.add(Path::new(path)).unwrap();
    }

    assert_eq!(watcher.roots(), paths(&["/a", "/b", "/c", "/d"]));
    assert_eq!(backend.restarts(), 3);
}

#[test]
fn test_add_cleans_path_before_containment() {
    let (watcher, backend) = watcher();

    watcher.add(Path::new("/a/./b/..")).unwrap();
    watcher.add(Path::new("/a//c/")).unwrap();

    assert_eq!(watcher.roots(), paths(&["/a"]));
    assert!(watcher.is_tracking_path(Path::new("/a")));
    assert_eq!(backend.calls().len(), 1);
}

#[test]
fn test_startup_created_event_is_suppressed() {
    let (watcher, backend) = watcher();
    let events = watcher.events();

    watcher.add(Path::new("/a")).unwrap();
    backend.emit(vec![created("/a")]);
    backend.emit(vec![created("/a/file.txt")]);

    let event = events.recv_timeout(WAIT).unwrap();
    assert_eq!(event, FileEvent::new("/a/file.txt"));
}

#[test]
fn test_recreated_root_is_delivered() {
    let (watcher, backend) = watcher();
    let events = watcher.events();

    watcher.add(Path::new("/a")).unwrap();
    backend.emit(vec![created("/a")]);
    backend.emit(vec![created("/a")]);

    let event = events.recv_timeout(WAIT).unwrap();
    assert_eq!(event.path, PathBuf::from("/a"));
}

#[test]
fn test_created_event_for_non_root_is_delivered() {
    let (watcher, backend) = watcher();
    let events = watcher.events();

    watcher.add(Path::new("/a")).unwrap();
    watcher.add(Path::new("/a/sub")).unwrap();
    backend.emit(vec![created("/a/sub"), created("/a")]);

    // /a/sub was absorbed, so it is not a registered root.
    assert_eq!(
        events.recv_timeout(WAIT).unwrap().path,
        PathBuf::from("/a/sub")
    );
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_root_added_later_is_suppressed_on_restart() {
    let (watcher, backend) = watcher();
    let events = watcher.events();

    watcher.add(Path::new("/a")).unwrap();
    watcher.add(Path::new("/b")).unwrap();
    backend.emit(vec![created("/a"), created("/b"), created("/b/new")]);

    assert_eq!(
        events.recv_timeout(WAIT).unwrap().path,
        PathBuf::from("/b/new")
    );
}

#[test]
fn test_event_paths_are_rooted() {
    let (watcher, backend) = watcher();
    let events = watcher.events();

    watcher.add(Path::new("/foo")).unwrap();
    backend.emit(vec![RawChangeRecord::new(
        "foo/bar",
        ChangeFlags::ITEM_MODIFIED,
    )]);

    let event = events.recv_timeout(WAIT).unwrap();
    assert_eq!(event.path, PathBuf::from("/foo/bar"));
    assert!(event.path.is_absolute());
}

#[test]
fn test_events_preserve_backend_order() {
    let (watcher, backend) = watcher();
    let events = watcher.events();

    watcher.add(Path::new("/w")).unwrap();
    backend.emit(vec![
        RawChangeRecord::new("/w/1", ChangeFlags::ITEM_MODIFIED),
        RawChangeRecord::new("/w/2", ChangeFlags::ITEM_REMOVED),
    ]);
    backend.emit(vec![RawChangeRecord::new(
        "/w/3",
        ChangeFlags::ITEM_RENAMED,
    )]);

    let received: Vec<PathBuf> = (0..3)
        .map(|_| events.recv_timeout(WAIT).unwrap().path)
        .collect();
    assert_eq!(received, paths(&["/w/1", "/w/2", "/w/3"]));
}

#[test]
fn test_backend_errors_reach_error_queue() {
    let (watcher, backend) = watcher();
    let errors = watcher.errors();

    watcher.add(Path::new("/a")).unwrap();
    backend
        .errors_tx
        .send(WatchError::EventError {
            details: "kernel queue overflow".to_string(),
        })
        .unwrap();

    let err = errors.recv_timeout(WAIT).unwrap();
    assert!(matches!(err, WatchError::EventError { details } if details.contains("overflow")));
}

#[test]
fn test_unread_error_does_not_hold_back_events() {
    let (watcher, backend) = watcher();
    let events = watcher.events();

    watcher.add(Path::new("/a")).unwrap();
    backend
        .errors_tx
        .send(WatchError::EventError {
            details: "dropped events".to_string(),
        })
        .unwrap();
    backend.emit(vec![RawChangeRecord::new(
        "/a/f",
        ChangeFlags::ITEM_MODIFIED,
    )]);

    // Only the event queue is read.
    let event = events.recv_timeout(WAIT).unwrap();
    assert_eq!(event.path, PathBuf::from("/a/f"));

    // The error is still there for a reader that asks later.
    let err = watcher.errors().recv_timeout(WAIT).unwrap();
    assert!(matches!(err, WatchError::EventError { details } if details == "dropped events"));

    watcher.close().unwrap();
}

#[test]
fn test_close_disconnects_queues_and_is_idempotent() {
    let (watcher, backend) = watcher();
    let events = watcher.events();
    let errors = watcher.errors();

    watcher.add(Path::new("/a")).unwrap();
    watcher.close().unwrap();
    watcher.close().unwrap();

    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert_eq!(
        backend.calls(),
        vec![Call::Start(paths(&["/a"])), Call::Stop]
    );

    // Records pushed after close never surface.
    let _ = backend.records_tx.send(vec![created("/a/late")]);
    assert!(events.recv_timeout(WAIT).is_err());
    assert!(errors.recv_timeout(WAIT).is_err());
}

#[test]
fn test_close_before_add_disconnects_queues() {
    let (watcher, backend) = watcher();
    let events = watcher.events();

    watcher.close().unwrap();

    assert!(events.recv_timeout(WAIT).is_err());
    assert_eq!(backend.calls(), vec![Call::Stop]);
}

#[test]
fn test_add_after_close_fails() {
    let (watcher, backend) = watcher();

    watcher.add(Path::new("/a")).unwrap();
    watcher.close().unwrap();

    assert_eq!(watcher.add(Path::new("/b")), Err(WatchError::Closed));
    assert_eq!(watcher.add(Path::new("/a/b")), Err(WatchError::Closed));
    assert_eq!(backend.restarts(), 0);
}

#[test]
fn test_close_does_not_wait_for_undrained_send() {
    let (watcher, backend) = watcher();
    let watcher = Arc::new(watcher);

    watcher.add(Path::new("/a")).unwrap();
    // No reader: the dispatch loop blocks handing this over.
    backend.emit(vec![RawChangeRecord::new(
        "/a/x",
        ChangeFlags::ITEM_MODIFIED,
    )]);
    thread::sleep(Duration::from_millis(50));

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let closer = Arc::clone(&watcher);
    thread::spawn(move || {
        let result = closer.close();
        let _ = done_tx.send(result);
    });

    let result = done_rx.recv_timeout(WAIT).expect("close stalled on pending send");
    assert!(result.is_ok());
    assert!(watcher.events().recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_exhausted_backend_disconnects_events() {
    let (stream, backend) = scripted();
    let watcher = StreamWatcher::new(stream);
    let events = watcher.events();

    watcher.add(Path::new("/a")).unwrap();
    drop(backend.records_tx);

    assert!(events.recv_timeout(WAIT).is_err());
    watcher.close().unwrap();
}

#[test]
fn test_failed_start_leaves_registry_untouched() {
    let (watcher, backend) = watcher();

    backend.fail_next("backend unavailable");
    let err = watcher.add(Path::new("/a")).unwrap_err();
    assert!(matches!(err, WatchError::Stream { .. }));
    assert!(watcher.roots().is_empty());
    assert_eq!(watcher.state(), WatcherState::Unstarted);

    // A retry goes through a fresh start.
    watcher.add(Path::new("/a")).unwrap();
    assert_eq!(backend.calls(), vec![Call::Start(paths(&["/a"]))]);
    assert_eq!(watcher.state(), WatcherState::Running);
}

#[test]
fn test_failed_restart_leaves_registry_untouched() {
    let (watcher, backend) = watcher();
    let events = watcher.events();

    watcher.add(Path::new("/a")).unwrap();
    backend.fail_next("too many watches");
    assert!(watcher.add(Path::new("/b")).is_err());

    assert_eq!(watcher.roots(), paths(&["/a"]));
    assert_eq!(watcher.state(), WatcherState::Running);

    // The running loop is unaffected.
    backend.emit(vec![RawChangeRecord::new(
        "/a/f",
        ChangeFlags::ITEM_MODIFIED,
    )]);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap().path,
        PathBuf::from("/a/f")
    );
}

#[test]
fn test_concurrent_adds_start_exactly_once() {
    let (watcher, backend) = watcher();
    let watcher = Arc::new(watcher);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let watcher = Arc::clone(&watcher);
            thread::spawn(move || watcher.add(Path::new(&format!("/root{i}"))))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let calls = backend.calls();
    let starts = calls.iter().filter(|c| matches!(c, Call::Start(_))).count();
    assert_eq!(starts, 1);
    assert_eq!(backend.restarts(), 7);
    assert_eq!(watcher.roots().len(), 8);
}

#[test]
fn test_close_concurrent_with_add() {
    let (watcher, backend) = watcher();
    let watcher = Arc::new(watcher);
    watcher.add(Path::new("/base")).unwrap();

    let adder = {
        let watcher = Arc::clone(&watcher);
        thread::spawn(move || {
            for i in 0..50 {
                match watcher.add(Path::new(&format!("/dir{i}"))) {
                    Ok(()) => {}
                    Err(WatchError::Closed) => break,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        })
    };
    watcher.close().unwrap();
    adder.join().unwrap();

    let calls = backend.calls();
    assert_eq!(calls.iter().filter(|c| **c == Call::Stop).count(), 1);
    assert_eq!(calls.last(), Some(&Call::Stop));
}

#[test]
fn test_drop_closes_watcher() {
    let (watcher, backend) = watcher();
    let events = watcher.events();

    watcher.add(Path::new("/a")).unwrap();
    drop(watcher);

    assert_eq!(backend.calls().last(), Some(&Call::Stop));
    assert!(events.recv_timeout(WAIT).is_err());
}

#[test]
fn test_watcher_behind_trait_object() {
    let (stream, backend) = scripted();
    let watcher: Box<dyn Notify> = Box::new(StreamWatcher::new(stream));
    let events = watcher.events();

    watcher.add(Path::new("/t")).unwrap();
    backend.emit(vec![created("/t"), created("/t/a")]);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap().path,
        PathBuf::from("/t/a")
    );

    watcher.close().unwrap();
    assert!(events.recv_timeout(WAIT).is_err());
}
