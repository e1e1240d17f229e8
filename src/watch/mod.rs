// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - compiling `[watch.*]` glob / exclude patterns ([`patterns`]),
//! - the pure debounce state machine per watch ([`debounce`]),
//! - wiring a cross-platform filesystem watcher (`notify`) to one debounce
//!   loop per watch, evicting cache entries on deletes ([`watcher`]).
//!
//! It does not know how tasks run; it calls back through [`TaskInvoker`].

pub mod debounce;
pub mod path_utils;
pub mod patterns;
pub mod watcher;

pub use debounce::{DebounceMachine, WatchPhase};
pub use patterns::WatchProfile;
pub use watcher::{spawn_watch_loop, spawn_watches, TaskInvoker, WatchSignal, WatcherHandle};
