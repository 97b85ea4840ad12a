//! The two long-lived threads of a view.
//!
//! The notify thread only moves watcher events into the pending
//! collection. The io thread is the sole mutator: it runs the initial crawl,
//! applies batches, and performs maintenance when the queue goes idle.

use std::sync::atomic::Ordering;
use std::time::{Instant, SystemTime};

use super::inmemory::InMemoryView;
use crate::observability::spans;
use crate::watcher::{PendingChanges, PendingFlags};

/// Idle waits back off up to this multiple of the settle period.
const MAX_SETTLE_BACKOFF: u32 = 64;

impl InMemoryView {
    pub(crate) fn notify_thread(&self) {
        let span = spans::root_thread_span("notify", &self.root_path);
        let _guard = span.enter();
        tracing::debug!("Notify thread started");

        while !self.cancel.is_cancelled() {
            if !self.watcher.wait_notify(self.config.notify_poll()) {
                continue;
            }
            let result = self.watcher.consume_notify(&self.root_path, &self.pending);
            if result.cancel_self {
                tracing::error!(root = %self.root_path.display(), "Watcher lost the root, cancelling view");
                self.cancel.cancel();
                self.pending.ping();
                break;
            }
        }
        tracing::debug!("Notify thread stopped");
    }

    pub(crate) fn io_thread(&self) {
        let span = spans::root_thread_span("io", &self.root_path);
        let _guard = span.enter();
        tracing::debug!("Io thread started");

        let settle = self.config.settle();
        let mut timeout = settle;
        let mut pending = PendingChanges::new();

        while !self.cancel.is_cancelled() {
            if !self.crawl_state.lock().done_initial {
                self.full_crawl(&mut pending);
                timeout = settle;
                continue;
            }

            let woken = self.pending.wait(timeout);
            if self.cancel.is_cancelled() {
                break;
            }

            pending.append(self.pending.steal_items());
            if !woken && pending.is_empty() {
                self.handle_settle();
                timeout = (timeout * 2).min(settle * MAX_SETTLE_BACKOFF);
            } else {
                timeout = settle;
                self.apply_pending_batch(&mut pending);
            }

            if let Some(reason) = self.take_recrawl_request() {
                self.note_recrawl(&reason);
                self.full_crawl(&mut pending);
            }
        }
        tracing::debug!("Io thread stopped");
    }

    /// Crawl the whole root and resolve the ready future once the result
    /// has been applied.
    pub(crate) fn full_crawl(&self, pending: &mut PendingChanges) {
        let recrawl_count = self.recrawl.lock().count;
        let span = spans::crawl_span(&self.root_path, recrawl_count);
        let _guard = span.enter();

        let start = Instant::now();
        {
            let mut state = self.crawl_state.lock();
            if state.done_initial {
                state.reset();
            }
        }
        if recrawl_count > 0 {
            self.cookies.abort_all_cookies();
        }

        pending.add(&self.root_path, SystemTime::now(), PendingFlags::RECURSIVE);
        loop {
            pending.append(self.pending.steal_items());
            if pending.is_empty() || self.cancel.is_cancelled() {
                break;
            }
            self.apply_pending_batch(pending);
        }
        if self.cancel.is_cancelled() {
            tracing::debug!(root = %self.root_path.display(), "Crawl abandoned");
            return;
        }

        let duration = start.elapsed();
        {
            let mut state = self.crawl_state.lock();
            state.done_initial = true;
            state.last_crawl_duration = Some(duration);
            state.resolve();
        }

        tracing::info!(
            root = %self.root_path.display(),
            ticks = self.most_recent_tick.load(Ordering::Acquire),
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Crawl complete"
        );
    }

    /// Maintenance run whenever the queue has been idle for a settle period.
    fn handle_settle(&self) {
        let last = self.get_last_age_out_timestamp();
        let due = SystemTime::now()
            .duration_since(last)
            .is_ok_and(|elapsed| elapsed >= self.config.gc_interval());
        if due {
            self.age_out(self.config.gc_age());
        }

        if self.config.enable_content_cache_warming
            && self.last_warmed_tick.load(Ordering::Acquire)
                < self.most_recent_tick.load(Ordering::Acquire)
        {
            self.warm_content_cache();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::query::{MatchAll, Query};
    use crate::watcher::{ManualWatcher, WatcherFlags};
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_threads_run_initial_crawl_and_stop() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), b"a").unwrap();

        let view = Arc::new(
            InMemoryView::new(
                tmp.path(),
                Config::default(),
                Arc::new(ManualWatcher::new(WatcherFlags::empty())),
            )
            .unwrap(),
        );
        view.start_threads().unwrap();
        assert!(wait_for(|| view.is_ready()));

        let result = view.run_query(&Query::new(), &MatchAll).unwrap();
        assert_eq!(result.paths(), vec![std::path::PathBuf::from("a")]);

        view.shutdown();
        assert!(view.is_cancelled());
        assert!(view.start_threads().is_err());
    }

    #[test]
    fn test_scheduled_recrawl_picks_up_unreported_changes() {
        let tmp = TempDir::new().unwrap();
        let view = Arc::new(
            InMemoryView::new(
                tmp.path(),
                Config::default(),
                Arc::new(ManualWatcher::new(WatcherFlags::empty())),
            )
            .unwrap(),
        );
        view.start_threads().unwrap();
        assert!(wait_for(|| view.is_ready()));

        fs::write(tmp.path().join("late"), b"x").unwrap();
        view.schedule_recrawl("test");
        assert!(wait_for(|| view.do_any_of_these_files_exist(&["late"])));
        assert!(wait_for(|| view.recrawl.lock().count == 1));

        view.shutdown();
    }

    #[test]
    fn test_settle_ages_out_when_interval_elapsed() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("gone"), b"x").unwrap();
        let config = Config {
            gc_age_seconds: 0,
            gc_interval_seconds: 0,
            ..Config::default()
        };
        let view = InMemoryView::new(
            tmp.path(),
            config,
            Arc::new(ManualWatcher::new(WatcherFlags::empty())),
        )
        .unwrap();
        view.client_mode_crawl().unwrap();

        fs::remove_file(tmp.path().join("gone")).unwrap();
        let mut pending = PendingChanges::new();
        pending.add(tmp.path().canonicalize().unwrap().join("gone"), SystemTime::now(), PendingFlags::VIA_NOTIFY);
        view.apply_pending_batch(&mut pending);
        assert_eq!(view.database().num_files(), 1);

        // Tombstones must be strictly older than the cutoff.
        std::thread::sleep(Duration::from_millis(20));
        view.handle_settle();
        assert_eq!(view.database().num_files(), 0);
        assert!(view.get_last_age_out_tick_value() > 0);
    }
}
