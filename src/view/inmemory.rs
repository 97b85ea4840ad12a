//! The in-memory view of one watched root.
//!
//! `InMemoryView` owns the `ViewDatabase` behind a reader/writer lock. The
//! io thread is its only writer; queries take the read lock for the whole
//! of their traversal. See `pipeline.rs` for how pending changes are
//! applied, `generators.rs` for queries and `threads.rs` for the loops.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;

use super::clock::{next_root_number, process_start_time, ClockPosition};
use super::cookies::CookieSync;
use super::database::ViewDatabase;
use super::ignore::IgnoreSet;
use super::ring_buffer::{PendingChangeLogEntry, RingBuffer};
use crate::cache::{ContentHashCacheKey, InMemoryViewCaches};
use crate::config::Config;
use crate::error::{ViewError, WatcherError};
use crate::observability::{FILES_AGED_OUT, FILES_TRACKED};
use crate::watcher::{PendingChanges, PendingCollection, Watcher};
use crate::{Error, Result};

pub(crate) type ReadyFuture = Shared<oneshot::Receiver<()>>;

/// Progress of the initial crawl or the current recrawl.
pub(crate) struct CrawlState {
    /// Resolved once the crawl has fully applied.
    pub(crate) ready: ReadyFuture,
    pub(crate) promise: Option<oneshot::Sender<()>>,
    pub(crate) done_initial: bool,
    pub(crate) last_crawl_duration: Option<Duration>,
}

impl CrawlState {
    fn new() -> Self {
        let (promise, ready) = oneshot::channel();
        Self {
            ready: ready.shared(),
            promise: Some(promise),
            done_initial: false,
            last_crawl_duration: None,
        }
    }

    /// Arrange for a fresh ready future, unless the current one is still
    /// unresolved.
    pub(crate) fn reset(&mut self) {
        if self.promise.is_none() {
            let (promise, ready) = oneshot::channel();
            self.ready = ready.shared();
            self.promise = Some(promise);
        }
    }

    pub(crate) fn resolve(&mut self) {
        if let Some(promise) = self.promise.take() {
            let _ = promise.send(());
        }
    }
}

/// Why and how often the root has been recrawled.
#[derive(Debug, Default)]
pub(crate) struct RecrawlInfo {
    pub(crate) requested: Option<String>,
    pub(crate) count: u64,
    pub(crate) last_reason: Option<String>,
}

pub struct InMemoryView {
    pub(crate) config: Config,
    pub(crate) root_path: PathBuf,
    root_number: u32,
    pub(crate) db: RwLock<ViewDatabase>,
    /// Written only by the mutator, after the mutation it describes.
    pub(crate) most_recent_tick: AtomicU32,
    pub(crate) last_age_out_tick: AtomicU32,
    /// Seconds since the epoch.
    pub(crate) last_age_out_timestamp: AtomicU64,
    pub(crate) last_warmed_tick: AtomicU32,
    pub(crate) pending: PendingCollection,
    pub(crate) watcher: Arc<dyn Watcher>,
    pub(crate) caches: Arc<InMemoryViewCaches>,
    pub(crate) cookies: CookieSync,
    pub(crate) ignore: IgnoreSet,
    pub(crate) crawl_state: Mutex<CrawlState>,
    pub(crate) recrawl: Mutex<RecrawlInfo>,
    pub(crate) processed_paths: Option<RingBuffer<PendingChangeLogEntry>>,
    pub(crate) cancel: CancellationToken,
    threads: Mutex<Vec<JoinHandle<()>>>,
    threads_started: AtomicBool,
}

impl InMemoryView {
    /// Create a view of `root_path`. Nothing is crawled until
    /// [`start_threads`](Self::start_threads) or
    /// [`client_mode_crawl`](Self::client_mode_crawl) is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the root cannot
    /// be resolved.
    pub fn new(root_path: impl AsRef<Path>, config: Config, watcher: Arc<dyn Watcher>) -> Result<Self> {
        config.validate()?;
        let root_path = std::fs::canonicalize(root_path.as_ref())?;

        let caches = Arc::new(InMemoryViewCaches::new(
            &root_path,
            config.content_hash_max_items,
            config.symlink_cache_max_items,
            config.error_ttl(),
        ));
        let ignore = IgnoreSet::new(&root_path, &config.ignore_dirs, &config.ignore_vcs);
        let processed_paths =
            (config.pending_log_size > 0).then(|| RingBuffer::new(config.pending_log_size));
        let now_secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let root_number = next_root_number();
        tracing::debug!(root = %root_path.display(), root_number, watcher = watcher.name(), "Created view");

        Ok(Self {
            db: RwLock::new(ViewDatabase::new(root_path.clone())),
            cookies: CookieSync::new(&root_path),
            root_path,
            root_number,
            config,
            most_recent_tick: AtomicU32::new(1),
            last_age_out_tick: AtomicU32::new(0),
            last_age_out_timestamp: AtomicU64::new(now_secs),
            last_warmed_tick: AtomicU32::new(0),
            pending: PendingCollection::new(),
            watcher,
            caches,
            ignore,
            crawl_state: Mutex::new(CrawlState::new()),
            recrawl: Mutex::new(RecrawlInfo::default()),
            processed_paths,
            cancel: CancellationToken::new(),
            threads: Mutex::new(Vec::new()),
            threads_started: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn watcher(&self) -> &Arc<dyn Watcher> {
        &self.watcher
    }

    /// Shared access to the tree, held until the guard is dropped.
    pub fn database(&self) -> RwLockReadGuard<'_, ViewDatabase> {
        self.db.read()
    }

    /// Start the watcher and spawn the notify and io threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot start, a thread cannot be
    /// spawned, or the threads were already started.
    pub fn start_threads(self: &Arc<Self>) -> Result<()> {
        if self.threads_started.swap(true, Ordering::AcqRel) {
            return Err(Error::internal("view threads already started"));
        }
        self.watcher.start(&self.root_path)?;

        let mut handles = Vec::with_capacity(2);
        for (name, body) in [
            ("notify", Self::notify_thread as fn(&Self)),
            ("io", Self::io_thread as fn(&Self)),
        ] {
            let view = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("{name} {}", self.root_path.display()))
                .spawn(move || body(&view))
                .map_err(|e| WatcherError::ThreadSpawn(format!("{name}: {e}")))?;
            handles.push(handle);
        }
        self.threads.lock().extend(handles);

        tracing::info!(root = %self.root_path.display(), "View threads started");
        Ok(())
    }

    /// Ask both threads to stop at their next blocking point.
    pub fn signal_threads(&self) {
        self.cancel.cancel();
        self.watcher.signal_threads();
        self.pending.ping();
    }

    /// Stop and join the threads. Pending ready futures resolve with
    /// `ViewError::Cancelled`.
    pub fn shutdown(&self) {
        self.signal_threads();
        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!(root = %self.root_path.display(), "View thread panicked");
            }
        }
        self.crawl_state.lock().promise.take();
        self.cookies.abort_all_cookies();
        tracing::info!(root = %self.root_path.display(), "View stopped");
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the current crawl has been applied.
    ///
    /// The future fails with `ViewError::Cancelled` if the view shuts down
    /// first.
    pub fn wait_until_ready_to_query(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let ready = self.crawl_state.lock().ready.clone();
        async move { ready.await.map_err(|_| Error::from(ViewError::Cancelled)) }
    }

    /// Whether the initial crawl has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.crawl_state.lock().done_initial
    }

    #[must_use]
    pub fn get_most_recent_root_number_and_tick_value(&self) -> ClockPosition {
        ClockPosition::new(self.root_number, self.most_recent_tick.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn get_current_clock_string(&self) -> String {
        self.get_most_recent_root_number_and_tick_value()
            .to_clock_string(process_start_time(), std::process::id())
    }

    #[must_use]
    pub fn get_last_age_out_tick_value(&self) -> u32 {
        self.last_age_out_tick.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn get_last_age_out_timestamp(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.last_age_out_timestamp.load(Ordering::Acquire))
    }

    /// Evict files that have been deleted for at least `min_age`.
    pub fn age_out(&self, min_age: Duration) {
        let now = SystemTime::now();
        let cutoff = now.checked_sub(min_age).unwrap_or(SystemTime::UNIX_EPOCH);

        let (outcome, num_files) = {
            let mut db = self.db.write();
            let outcome = db.age_out(cutoff);
            (outcome, db.num_files())
        };

        if outcome.files_removed > 0 {
            self.last_age_out_tick
                .fetch_max(outcome.max_tick, Ordering::AcqRel);
        }
        let now_secs = now
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_age_out_timestamp.store(now_secs, Ordering::Release);

        FILES_AGED_OUT.inc_by(outcome.files_removed as u64);
        FILES_TRACKED.set(i64::try_from(num_files).unwrap_or(i64::MAX));
        tracing::info!(
            root = %self.root_path.display(),
            files_removed = outcome.files_removed,
            dirs_removed = outcome.dirs_removed,
            max_tick = outcome.max_tick,
            "Aged out deleted files"
        );
    }

    /// Block until a cookie written now has round-tripped through the
    /// watcher and the pipeline.
    ///
    /// # Errors
    ///
    /// - `ViewError::SettleTimeout` if that takes longer than `timeout`
    /// - `ViewError::Desynced` if the watcher lost events meanwhile
    pub fn sync_to_now(&self, timeout: Duration) -> Result<()> {
        self.cookies.sync_to_now(timeout)
    }

    /// Request a full recrawl from any thread.
    pub fn schedule_recrawl(&self, reason: &str) {
        {
            let mut info = self.recrawl.lock();
            if info.requested.is_none() {
                tracing::warn!(root = %self.root_path.display(), %reason, "Recrawl scheduled");
                info.requested = Some(reason.to_string());
            }
        }
        self.pending.ping();
    }

    pub(crate) fn take_recrawl_request(&self) -> Option<String> {
        self.recrawl.lock().requested.take()
    }

    fn ensure_threads_not_running(&self) -> Result<()> {
        if self.threads_started.load(Ordering::Acquire) {
            return Err(Error::internal(
                "the view is driven by its own threads; synchronous processing is unavailable",
            ));
        }
        Ok(())
    }

    /// Run the full crawl on the calling thread, for views without threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the view threads were started.
    pub fn client_mode_crawl(&self) -> Result<()> {
        self.ensure_threads_not_running()?;
        let mut pending = PendingChanges::new();
        self.full_crawl(&mut pending);
        Ok(())
    }

    /// Pull whatever the watcher has queued and apply it on the calling
    /// thread. Returns true if the watcher reported lost events.
    ///
    /// # Errors
    ///
    /// Returns an error if the view threads were started.
    pub fn process_pending(&self) -> Result<bool> {
        self.ensure_threads_not_running()?;

        let notify = self.watcher.consume_notify(&self.root_path, &self.pending);
        if notify.cancel_self {
            self.cancel.cancel();
        }

        let mut pending = self.pending.steal_items();
        let desynced = self.apply_pending_batch(&mut pending);
        if let Some(reason) = self.take_recrawl_request() {
            self.note_recrawl(&reason);
            self.full_crawl(&mut pending);
        }
        Ok(desynced)
    }

    pub(crate) fn note_recrawl(&self, reason: &str) {
        let mut info = self.recrawl.lock();
        info.count += 1;
        info.last_reason = Some(reason.to_string());
    }

    /// Whether any of `names` (relative to the root) currently exists.
    #[must_use]
    pub fn do_any_of_these_files_exist<P: AsRef<Path>>(&self, names: &[P]) -> bool {
        let db = self.db.read();
        names.iter().any(|name| {
            let full = self.root_path.join(name);
            let (Some(parent), Some(base)) = (full.parent(), full.file_name()) else {
                return false;
            };
            db.resolve_dir(parent)
                .and_then(|dir| db.dir(dir).child_file(base))
                .is_some_and(|file| db.file(file).exists())
        })
    }

    /// Hash files that changed since the last warm so later content-hash
    /// queries hit the cache.
    pub fn warm_content_cache(&self) {
        let since = self.last_warmed_tick.load(Ordering::Acquire);
        let (keys, tick) = {
            let db = self.db.read();
            let tick = self.most_recent_tick.load(Ordering::Acquire);
            let keys: Vec<ContentHashCacheKey> = db
                .recency()
                .take_while(|(_, file)| file.otime().ticks > since)
                .filter(|(_, file)| file.exists() && file.stat().is_file())
                .take(self.config.content_cache_warming_max_files)
                .filter_map(|(id, file)| {
                    db.file_path(id)
                        .strip_prefix(&self.root_path)
                        .ok()
                        .map(|rel| ContentHashCacheKey::new(rel, file.stat()))
                })
                .collect();
            (keys, tick)
        };
        self.last_warmed_tick.store(tick, Ordering::Release);

        if keys.is_empty() {
            return;
        }
        tracing::debug!(count = keys.len(), "Warming content hash cache");
        if self.config.sync_content_cache_warming {
            self.caches.content_hash.prefetch(keys);
        } else {
            let caches = Arc::clone(&self.caches);
            rayon::spawn(move || caches.content_hash.prefetch(keys));
        }
    }

    /// Counters and state for diagnostics.
    #[must_use]
    pub fn get_view_debug_info(&self) -> serde_json::Value {
        let (num_files, num_dirs) = {
            let db = self.db.read();
            (db.num_files(), db.num_dirs())
        };
        let (done_initial, last_crawl_ms) = {
            let state = self.crawl_state.lock();
            (
                state.done_initial,
                state
                    .last_crawl_duration
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            )
        };
        let (recrawl_count, last_recrawl_reason) = {
            let info = self.recrawl.lock();
            (info.count, info.last_reason.clone())
        };

        serde_json::json!({
            "root": self.root_path.display().to_string(),
            "root_number": self.root_number,
            "tick": self.most_recent_tick.load(Ordering::Acquire),
            "clock": self.get_current_clock_string(),
            "num_files": num_files,
            "num_dirs": num_dirs,
            "last_age_out_tick": self.get_last_age_out_tick_value(),
            "last_age_out_timestamp": self.last_age_out_timestamp.load(Ordering::Acquire),
            "done_initial": done_initial,
            "last_crawl_duration_ms": last_crawl_ms,
            "recrawl_count": recrawl_count,
            "last_recrawl_reason": last_recrawl_reason,
            "pending": self.pending.len(),
            "outstanding_cookies": self.cookies.num_outstanding(),
            "caches": self.caches.stats(),
            "processed_paths": self.processed_paths.as_ref().map(RingBuffer::snapshot),
        })
    }

    pub fn clear_view_debug_info(&self) {
        self.caches.clear_stats();
        if let Some(ring) = &self.processed_paths {
            ring.clear();
        }
    }

    #[must_use]
    pub fn get_watcher_debug_info(&self) -> serde_json::Value {
        self.watcher.debug_info()
    }

    pub fn clear_watcher_debug_info(&self) {
        self.watcher.clear_debug_info();
    }
}

impl std::fmt::Debug for InMemoryView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryView")
            .field("root_path", &self.root_path)
            .field("root_number", &self.root_number)
            .field("watcher", &self.watcher.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::{ManualWatcher, WatcherFlags};
    use std::fs;
    use tempfile::TempDir;
    use tokio_test::{assert_pending, assert_ready, assert_ready_ok, task};

    fn view_with(tmp: &TempDir, config: Config) -> InMemoryView {
        InMemoryView::new(
            tmp.path(),
            config,
            Arc::new(ManualWatcher::new(WatcherFlags::empty())),
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            settle_ms: 0,
            ..Config::default()
        };
        let err = InMemoryView::new(
            tmp.path(),
            config,
            Arc::new(ManualWatcher::new(WatcherFlags::empty())),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_ready_future_resolves_after_crawl() {
        let tmp = TempDir::new().unwrap();
        let view = view_with(&tmp, Config::default());

        let mut ready = task::spawn(view.wait_until_ready_to_query());
        assert_pending!(ready.poll());
        assert!(!view.is_ready());

        view.client_mode_crawl().unwrap();
        assert!(ready.is_woken());
        assert_ready_ok!(ready.poll());
        assert!(view.is_ready());

        // Futures taken after the crawl are already resolved.
        let mut later = task::spawn(view.wait_until_ready_to_query());
        assert_ready_ok!(later.poll());
    }

    #[test]
    fn test_shutdown_cancels_ready_future() {
        let tmp = TempDir::new().unwrap();
        let view = view_with(&tmp, Config::default());

        let mut ready = task::spawn(view.wait_until_ready_to_query());
        assert_pending!(ready.poll());
        view.shutdown();

        let outcome = assert_ready!(ready.poll());
        assert!(matches!(outcome, Err(Error::View(ViewError::Cancelled))));
        assert!(view.is_cancelled());
    }

    #[test]
    fn test_clock_string_tracks_ticks() {
        let tmp = TempDir::new().unwrap();
        let view = view_with(&tmp, Config::default());
        let before = view.get_most_recent_root_number_and_tick_value();
        assert_eq!(before.ticks, 1);

        view.client_mode_crawl().unwrap();
        let after = view.get_most_recent_root_number_and_tick_value();
        assert_eq!(after.root_number, before.root_number);
        assert!(after.ticks > before.ticks);
        assert!(view
            .get_current_clock_string()
            .ends_with(&format!(":{}:{}", after.root_number, after.ticks)));
    }

    #[test]
    fn test_do_any_of_these_files_exist() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("d")).unwrap();
        fs::write(tmp.path().join("d/f"), "f").unwrap();
        let view = view_with(&tmp, Config::default());
        view.client_mode_crawl().unwrap();

        assert!(view.do_any_of_these_files_exist(&["d/f"]));
        assert!(view.do_any_of_these_files_exist(&["nope", "d"]));
        assert!(!view.do_any_of_these_files_exist(&["d/nope"]));
        assert!(!view.do_any_of_these_files_exist::<&str>(&[]));
    }

    #[test]
    fn test_age_out_records_timestamp() {
        let tmp = TempDir::new().unwrap();
        let view = view_with(&tmp, Config::default());
        view.client_mode_crawl().unwrap();

        let before = view.get_last_age_out_timestamp();
        view.age_out(Duration::from_secs(3600));
        assert!(view.get_last_age_out_timestamp() >= before);
        // Nothing was deleted, so no clock became stale.
        assert_eq!(view.get_last_age_out_tick_value(), 0);
    }

    #[test]
    fn test_warm_content_cache_hashes_changed_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), "a").unwrap();
        fs::write(tmp.path().join("b"), "b").unwrap();
        let config = Config {
            enable_content_cache_warming: true,
            sync_content_cache_warming: true,
            ..Config::default()
        };
        let view = view_with(&tmp, config);
        view.client_mode_crawl().unwrap();

        view.warm_content_cache();
        assert_eq!(view.caches.content_hash.stats().misses, 2);

        // Nothing changed since the last warm.
        view.warm_content_cache();
        assert_eq!(view.caches.content_hash.stats().misses, 2);
    }

    #[test]
    fn test_debug_info_reports_counts() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), "a").unwrap();
        let view = view_with(&tmp, Config::default());
        view.client_mode_crawl().unwrap();

        let info = view.get_view_debug_info();
        assert_eq!(info["num_files"], 1);
        assert_eq!(info["done_initial"], true);
        assert_eq!(info["recrawl_count"], 0);
        assert!(info["caches"].as_array().is_some_and(|c| c.len() == 2));
        assert!(info["processed_paths"].is_null());

        assert_eq!(view.get_watcher_debug_info()["watcher"], "manual");
    }

    #[test]
    fn test_synchronous_processing_refused_while_threaded() {
        let tmp = TempDir::new().unwrap();
        let view = Arc::new(view_with(&tmp, Config::default()));
        view.start_threads().unwrap();

        assert!(view.client_mode_crawl().is_err());
        assert!(view.process_pending().is_err());
        view.shutdown();
    }
}
