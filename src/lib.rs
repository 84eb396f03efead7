//! Recursive directory change watching.
//!
//! See [`watcher`] for the watcher contract and [`config`] for settings.

pub mod config;
pub mod logging;
pub mod watcher;

pub use config::Settings;
pub use watcher::{FileEvent, Notify, WatchError, new_watcher, new_watcher_with};
