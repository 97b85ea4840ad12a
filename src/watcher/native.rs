//! OS notification backend using notify-rs.

#![allow(clippy::used_underscore_binding)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, Debouncer};
use parking_lot::Mutex;

use super::backend::{ConsumeNotifyResult, Watcher, WatcherFlags};
use super::pending::{PendingChange, PendingCollection, PendingFlags};
use crate::error::WatcherError;
use crate::Result;

/// Default debounce duration for file events.
const DEBOUNCE_DURATION: Duration = Duration::from_millis(50);

/// Messages passed from the debouncer callback to the notify thread.
#[derive(Debug)]
enum WatchMessage {
    Changed(Vec<PathBuf>),
    Failed(String),
    Wake,
}

/// Watcher backed by the platform's recommended notify implementation.
///
/// Events are debounced, so delivery is coalesced rather than per-file; a
/// backend error means events were dropped and is surfaced as a desynced
/// recursive change of the root.
pub struct NotifyWatcher {
    debounce: Duration,
    _debouncer: Mutex<Option<Debouncer<RecommendedWatcher>>>,
    event_tx: Sender<WatchMessage>,
    event_rx: Receiver<WatchMessage>,
    stash: Mutex<Vec<WatchMessage>>,
    events_seen: AtomicU64,
    errors_seen: AtomicU64,
}

impl Default for NotifyWatcher {
    fn default() -> Self {
        Self::new(DEBOUNCE_DURATION)
    }
}

impl NotifyWatcher {
    /// Create a watcher that coalesces events over `debounce`.
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            debounce,
            _debouncer: Mutex::new(None),
            event_tx,
            event_rx,
            stash: Mutex::new(Vec::new()),
            events_seen: AtomicU64::new(0),
            errors_seen: AtomicU64::new(0),
        }
    }
}

impl Watcher for NotifyWatcher {
    fn name(&self) -> &str {
        "notify"
    }

    fn flags(&self) -> WatcherFlags {
        WatcherFlags::empty()
    }

    fn start(&self, root_path: &Path) -> Result<()> {
        if !root_path.exists() {
            return Err(WatcherError::WatchFailed {
                path: root_path.display().to_string(),
                reason: "directory does not exist".to_string(),
            }
            .into());
        }

        let tx = self.event_tx.clone();
        let mut debouncer = new_debouncer(
            self.debounce,
            move |result: std::result::Result<
                Vec<notify_debouncer_mini::DebouncedEvent>,
                notify::Error,
            >| {
                let message = match result {
                    Ok(events) => {
                        WatchMessage::Changed(events.into_iter().map(|e| e.path).collect())
                    }
                    Err(e) => WatchMessage::Failed(e.to_string()),
                };
                let _ = tx.send(message);
            },
        )
        .map_err(|e| WatcherError::WatchFailed {
            path: root_path.display().to_string(),
            reason: e.to_string(),
        })?;

        debouncer
            .watcher()
            .watch(root_path, RecursiveMode::Recursive)
            .map_err(|e| WatcherError::WatchFailed {
                path: root_path.display().to_string(),
                reason: e.to_string(),
            })?;

        *self._debouncer.lock() = Some(debouncer);
        tracing::info!(path = %root_path.display(), "Watching directory");
        Ok(())
    }

    fn wait_notify(&self, timeout: Duration) -> bool {
        if !self.stash.lock().is_empty() {
            return true;
        }
        match self.event_rx.recv_timeout(timeout) {
            Ok(message) => {
                self.stash.lock().push(message);
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    fn consume_notify(&self, root_path: &Path, pending: &PendingCollection) -> ConsumeNotifyResult {
        let mut messages = std::mem::take(&mut *self.stash.lock());
        messages.extend(self.event_rx.try_iter());

        let now = SystemTime::now();
        let mut changes = Vec::new();
        let mut cancel_self = false;

        for message in messages {
            match message {
                WatchMessage::Changed(paths) => {
                    self.events_seen
                        .fetch_add(paths.len() as u64, Ordering::Relaxed);
                    changes.extend(
                        paths
                            .into_iter()
                            .filter(|p| is_under_root(root_path, p))
                            .map(|p| PendingChange::new(p, now, PendingFlags::VIA_NOTIFY)),
                    );
                }
                WatchMessage::Failed(reason) => {
                    self.errors_seen.fetch_add(1, Ordering::Relaxed);
                    if root_path.exists() {
                        tracing::warn!(
                            root = %root_path.display(),
                            %reason,
                            "Watcher lost events, scheduling desynced recrawl"
                        );
                        changes.push(PendingChange::new(
                            root_path,
                            now,
                            PendingFlags::RECURSIVE | PendingFlags::IS_DESYNCED,
                        ));
                    } else {
                        tracing::error!(root = %root_path.display(), %reason, "Root was removed");
                        cancel_self = true;
                    }
                }
                WatchMessage::Wake => {}
            }
        }

        ConsumeNotifyResult {
            added_pending: pending.add_all(changes),
            cancel_self,
        }
    }

    fn signal_threads(&self) {
        let _ = self.event_tx.send(WatchMessage::Wake);
    }

    fn debug_info(&self) -> serde_json::Value {
        serde_json::json!({
            "watcher": self.name(),
            "debounce_ms": u64::try_from(self.debounce.as_millis()).unwrap_or(u64::MAX),
            "events_seen": self.events_seen.load(Ordering::Relaxed),
            "errors_seen": self.errors_seen.load(Ordering::Relaxed),
            "started": self._debouncer.lock().is_some(),
        })
    }

    fn clear_debug_info(&self) {
        self.events_seen.store(0, Ordering::Relaxed);
        self.errors_seen.store(0, Ordering::Relaxed);
    }
}

/// Check if a path is inside the watched root.
fn is_under_root(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_debounce() {
        let watcher = NotifyWatcher::default();
        assert_eq!(watcher.debounce, DEBOUNCE_DURATION);
        assert_eq!(watcher.flags(), WatcherFlags::empty());
    }

    #[test]
    fn test_is_under_root() {
        let root = Path::new("/home/user/project");
        assert!(is_under_root(root, Path::new("/home/user/project/src/main.rs")));
        assert!(!is_under_root(root, Path::new("/tmp/other.txt")));
        assert!(!is_under_root(root, Path::new("/home/user/project2/x")));
    }

    #[test]
    fn test_start_nonexistent_dir() {
        let watcher = NotifyWatcher::default();
        assert!(watcher.start(Path::new("/nonexistent/directory")).is_err());
    }

    #[test]
    fn test_start_and_debug_info() {
        let tmp = TempDir::new().unwrap();
        let watcher = NotifyWatcher::default();
        watcher.start(tmp.path()).unwrap();
        assert_eq!(watcher.debug_info()["started"], true);
    }

    #[test]
    fn test_wake_is_consumed_without_changes() {
        let watcher = NotifyWatcher::default();
        watcher.signal_threads();
        assert!(watcher.wait_notify(Duration::from_millis(10)));

        let pending = PendingCollection::new();
        let result = watcher.consume_notify(Path::new("/root"), &pending);
        assert!(!result.added_pending);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_failure_queues_desynced_root_crawl() {
        let tmp = TempDir::new().unwrap();
        let watcher = NotifyWatcher::default();
        watcher
            .event_tx
            .send(WatchMessage::Failed("queue overflow".to_string()))
            .unwrap();

        let pending = PendingCollection::new();
        let result = watcher.consume_notify(tmp.path(), &pending);
        assert!(result.added_pending);

        let changes = pending.steal_items().steal_items();
        assert_eq!(changes.len(), 1);
        assert!(changes[0]
            .flags
            .contains(PendingFlags::RECURSIVE | PendingFlags::IS_DESYNCED));
    }

    #[test]
    fn test_failure_with_missing_root_cancels() {
        let watcher = NotifyWatcher::default();
        watcher
            .event_tx
            .send(WatchMessage::Failed("gone".to_string()))
            .unwrap();

        let pending = PendingCollection::new();
        let result = watcher.consume_notify(Path::new("/nonexistent/root"), &pending);
        assert!(result.cancel_self);
    }
}
