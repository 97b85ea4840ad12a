//! Watcher backends and the pending-change feed.
//!
//! This module provides:
//! - The `Watcher` capability interface the view consumes
//! - A notify-rs backend and a manually fed backend
//! - The coalescing pending-change queue
//! - lstat-equivalent snapshots

mod backend;
mod manual;
mod native;
mod pending;
mod stat;

pub use backend::{ConsumeNotifyResult, Watcher, WatcherFlags};
pub use manual::ManualWatcher;
pub use native::NotifyWatcher;
pub use pending::{PendingChange, PendingChanges, PendingCollection, PendingFlags};
pub use stat::{is_not_found, DirEntryStat, FileInformation, FileKind};
