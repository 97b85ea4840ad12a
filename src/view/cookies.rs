//! Sync cookies: sentinel files whose observation by the pipeline proves
//! that every change made before them has been processed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::ViewError;
use crate::{Error, Result};

/// Name prefix shared by every cookie file, whatever process wrote it.
pub const COOKIE_PREFIX: &str = ".watchview-cookie-";

type CookieOutcome = std::result::Result<(), ViewError>;

pub struct CookieSync {
    dir: PathBuf,
    prefix: String,
    serial: AtomicU64,
    outstanding: Mutex<HashMap<PathBuf, Sender<CookieOutcome>>>,
}

impl CookieSync {
    /// Cookies are written directly into `dir`, normally the watched root.
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: format!("{COOKIE_PREFIX}{}-", std::process::id()),
            serial: AtomicU64::new(1),
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `path` names a cookie file. Cookies are never tracked.
    #[must_use]
    pub fn is_cookie_path(&self, path: &Path) -> bool {
        path.parent() == Some(self.dir.as_path())
            && path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(COOKIE_PREFIX))
    }

    /// Release the waiter for `path`, if there is one.
    pub fn notify_cookie(&self, path: &Path) {
        if let Some(tx) = self.outstanding.lock().remove(path) {
            tracing::trace!(cookie = %path.display(), "Cookie observed");
            let _ = tx.send(Ok(()));
        }
    }

    /// Fail every outstanding wait; event ordering can no longer be trusted.
    pub fn abort_all_cookies(&self) {
        let aborted: Vec<_> = self.outstanding.lock().drain().collect();
        if !aborted.is_empty() {
            tracing::warn!(count = aborted.len(), "Aborting outstanding sync cookies");
        }
        for (_, tx) in aborted {
            let _ = tx.send(Err(ViewError::Desynced));
        }
    }

    #[must_use]
    pub fn num_outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    /// Write a cookie and block until the pipeline observes it.
    ///
    /// # Errors
    ///
    /// - `ViewError::SettleTimeout` if the cookie was not observed in time
    /// - `ViewError::Desynced` if the wait was aborted
    /// - an I/O error if the cookie file cannot be created
    pub fn sync_to_now(&self, timeout: Duration) -> Result<()> {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("{}{serial}", self.prefix));

        let (tx, rx) = bounded(1);
        self.outstanding.lock().insert(path.clone(), tx);

        if let Err(e) = std::fs::write(&path, b"") {
            self.outstanding.lock().remove(&path);
            return Err(e.into());
        }

        let outcome = rx.recv_timeout(timeout);
        self.outstanding.lock().remove(&path);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::debug!(cookie = %path.display(), error = %e, "Failed to remove cookie");
        }

        match outcome {
            Ok(result) => result.map_err(Error::from),
            Err(RecvTimeoutError::Timeout) => Err(ViewError::SettleTimeout { timeout }.into()),
            Err(RecvTimeoutError::Disconnected) => Err(ViewError::Cancelled.into()),
        }
    }
}
