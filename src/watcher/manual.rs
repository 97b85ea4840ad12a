//! A watcher fed explicitly by its owner.
//!
//! Useful when changes are sourced from somewhere other than the OS (an
//! embedding application, a replay log, tests).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::{Condvar, Mutex};

use super::backend::{ConsumeNotifyResult, Watcher, WatcherFlags};
use super::pending::{PendingChange, PendingCollection, PendingFlags};
use crate::Result;

/// Watcher whose notifications are injected by hand.
#[derive(Debug, Default)]
pub struct ManualWatcher {
    flags: WatcherFlags,
    queue: Mutex<VecDeque<(PathBuf, PendingFlags)>>,
    cond: Condvar,
    injected: AtomicU64,
    consumed: AtomicU64,
}

impl ManualWatcher {
    /// Create a watcher advertising the given delivery guarantees.
    #[must_use]
    pub fn new(flags: WatcherFlags) -> Self {
        Self {
            flags,
            ..Default::default()
        }
    }

    /// Report a change to `path`.
    pub fn inject(&self, path: impl Into<PathBuf>, flags: PendingFlags) {
        self.queue.lock().push_back((path.into(), flags));
        self.injected.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_all();
    }
}

impl Watcher for ManualWatcher {
    fn name(&self) -> &str {
        "manual"
    }

    fn flags(&self) -> WatcherFlags {
        self.flags
    }

    fn start(&self, root_path: &Path) -> Result<()> {
        tracing::debug!(root = %root_path.display(), "Manual watcher started");
        Ok(())
    }

    fn wait_notify(&self, timeout: Duration) -> bool {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            let _ = self.cond.wait_for(&mut queue, timeout);
        }
        !queue.is_empty()
    }

    fn consume_notify(&self, root_path: &Path, pending: &PendingCollection) -> ConsumeNotifyResult {
        let drained: Vec<(PathBuf, PendingFlags)> = self.queue.lock().drain(..).collect();
        let now = SystemTime::now();
        let changes: Vec<PendingChange> = drained
            .into_iter()
            .filter(|(path, _)| path.starts_with(root_path))
            .map(|(path, flags)| PendingChange::new(path, now, flags | PendingFlags::VIA_NOTIFY))
            .collect();
        self.consumed
            .fetch_add(changes.len() as u64, Ordering::Relaxed);

        ConsumeNotifyResult {
            added_pending: pending.add_all(changes),
            cancel_self: false,
        }
    }

    fn signal_threads(&self) {
        self.cond.notify_all();
    }

    fn debug_info(&self) -> serde_json::Value {
        serde_json::json!({
            "watcher": self.name(),
            "injected": self.injected.load(Ordering::Relaxed),
            "consumed": self.consumed.load(Ordering::Relaxed),
            "queued": self.queue.lock().len(),
        })
    }

    fn clear_debug_info(&self) {
        self.injected.store(0, Ordering::Relaxed);
        self.consumed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_and_consume() {
        let watcher = ManualWatcher::new(WatcherFlags::empty());
        watcher.inject("/root/a.txt", PendingFlags::empty());
        watcher.inject("/elsewhere/b.txt", PendingFlags::empty());

        assert!(watcher.wait_notify(Duration::from_millis(1)));

        let pending = PendingCollection::new();
        let result = watcher.consume_notify(Path::new("/root"), &pending);
        assert!(result.added_pending);
        assert!(!result.cancel_self);

        let mut changes = pending.steal_items().steal_items();
        assert_eq!(changes.len(), 1);
        let change = changes.remove(0);
        assert_eq!(change.path, PathBuf::from("/root/a.txt"));
        assert!(change.flags.contains(PendingFlags::VIA_NOTIFY));
    }

    #[test]
    fn test_wait_notify_times_out() {
        let watcher = ManualWatcher::default();
        assert!(!watcher.wait_notify(Duration::from_millis(5)));
    }

    #[test]
    fn test_debug_info_counts() {
        let watcher = ManualWatcher::default();
        watcher.inject("/root/a", PendingFlags::IS_DESYNCED);
        let info = watcher.debug_info();
        assert_eq!(info["injected"], 1);
        assert_eq!(info["queued"], 1);

        watcher.clear_debug_info();
        assert_eq!(watcher.debug_info()["injected"], 0);
    }
}
