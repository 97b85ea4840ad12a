//! The capability interface every watcher backend provides.

use std::io;
use std::path::Path;
use std::time::Duration;

use bitflags::bitflags;

use super::pending::PendingCollection;
use super::stat::{DirEntryStat, FileInformation};
use crate::Result;

bitflags! {
    /// Delivery guarantees of a backend.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct WatcherFlags: u8 {
        /// Every changed child is reported individually, so a changed
        /// directory only needs a shallow listing-and-diff.
        const HAS_PER_FILE_NOTIFICATIONS = 0x01;
        /// Renames arrive as a single coalesced event.
        const COALESCED_RENAME = 0x02;
    }
}

/// Outcome of draining a backend's notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeNotifyResult {
    /// At least one change was queued.
    pub added_pending: bool,
    /// The root is gone; the notify thread should stop.
    pub cancel_self: bool,
}

/// A source of filesystem change notifications for one root.
pub trait Watcher: Send + Sync {
    /// Short backend name for diagnostics.
    fn name(&self) -> &str;

    fn flags(&self) -> WatcherFlags;

    /// Begin watching the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot watch the root.
    fn start(&self, root_path: &Path) -> Result<()>;

    /// List a directory the crawler is about to reconcile.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from opening or reading the directory.
    fn start_watch_dir(&self, path: &Path) -> io::Result<Vec<DirEntryStat>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            // DirEntry::metadata does not traverse symlinks.
            let stat = entry
                .metadata()
                .ok()
                .map(|m| FileInformation::from_metadata(&m));
            entries.push(DirEntryStat {
                name: entry.file_name(),
                stat,
            });
        }
        Ok(entries)
    }

    /// lstat-equivalent for a single path.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the stat call.
    fn stat(&self, path: &Path) -> io::Result<FileInformation> {
        FileInformation::lstat(path)
    }

    /// Block for up to `timeout` until notifications are available.
    fn wait_notify(&self, timeout: Duration) -> bool;

    /// Move any available notifications into `pending`.
    fn consume_notify(&self, root_path: &Path, pending: &PendingCollection) -> ConsumeNotifyResult;

    /// Wake a thread blocked in `wait_notify`.
    fn signal_threads(&self) {}

    fn debug_info(&self) -> serde_json::Value {
        serde_json::json!({ "watcher": self.name() })
    }

    fn clear_debug_info(&self) {}
}
