//! Applying pending changes to the view.
//!
//! Each pending path is either crawled (the root, or anything flagged
//! `CRAWL_ONLY`) or stat'd. Both may queue further work into the same
//! `PendingChanges`, which is drained until empty. Filesystem errors never
//! stop the pipeline: not-found is a deletion, anything else is logged and
//! treated as a tentative deletion.

use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::SystemTime;

use super::clock::ClockStamp;
use super::database::ViewDatabase;
use super::entry::{DirId, FileId};
use super::inmemory::InMemoryView;
use super::ring_buffer::PendingChangeLogEntry;
use crate::error::ViewError;
use crate::observability::{CURRENT_TICK, FILES_TRACKED, PENDING_PROCESSED, STAT_ERRORS};
use crate::watcher::{is_not_found, FileInformation, PendingChange, PendingChanges, PendingFlags, WatcherFlags};

/// Whether a drained batch contained changes from a watcher that lost
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IsDesynced {
    Yes,
    No,
}

/// What stat reported for one processed path.
#[derive(Debug, Default)]
pub(crate) struct StatOutcome {
    errcode: Option<i32>,
    stat: Option<FileInformation>,
}

impl InMemoryView {
    /// Apply everything in `pending` as a single tick. Returns true if the
    /// batch was desynced, after aborting outstanding cookies.
    pub(crate) fn apply_pending_batch(&self, pending: &mut PendingChanges) -> bool {
        if pending.is_empty() {
            return false;
        }

        let desynced = {
            let mut db = self.db.write();
            let ticks = self.most_recent_tick.load(Ordering::Acquire) + 1;
            // One timestamp per tick keeps the recency list ordered by
            // timestamp as well as by tick.
            let stamp = ClockStamp::new(ticks, SystemTime::now());
            let desynced = self.process_all_pending(&mut db, pending, stamp);
            self.most_recent_tick.store(ticks, Ordering::Release);
            CURRENT_TICK.set(i64::from(ticks));
            FILES_TRACKED.set(i64::try_from(db.num_files()).unwrap_or(i64::MAX));
            desynced
        };

        if desynced == IsDesynced::Yes {
            tracing::warn!(root = %self.root_path.display(), "Watcher desynced, aborting sync cookies");
            self.cookies.abort_all_cookies();
            return true;
        }
        false
    }

    /// Drain `coll`, including anything processing adds to it.
    pub(crate) fn process_all_pending(
        &self,
        db: &mut ViewDatabase,
        coll: &mut PendingChanges,
        stamp: ClockStamp,
    ) -> IsDesynced {
        let mut desynced = IsDesynced::No;
        loop {
            let items = coll.steal_items();
            if items.is_empty() {
                break;
            }
            for item in items {
                if item.flags.contains(PendingFlags::IS_DESYNCED) {
                    desynced = IsDesynced::Yes;
                }
                self.process_path(db, coll, &item, stamp);
            }
        }
        desynced
    }

    fn process_path(
        &self,
        db: &mut ViewDatabase,
        coll: &mut PendingChanges,
        change: &PendingChange,
        stamp: ClockStamp,
    ) {
        PENDING_PROCESSED.inc();

        if self.cookies.is_cookie_path(&change.path) {
            self.cookies.notify_cookie(&change.path);
            return;
        }
        if self.ignore.is_ignored(&change.path) {
            return;
        }

        let outcome = if change.path == self.root_path
            || change.flags.contains(PendingFlags::CRAWL_ONLY)
        {
            self.crawler(db, coll, change, stamp);
            StatOutcome::default()
        } else {
            self.stat_path(db, coll, change, stamp)
        };

        if let Some(ring) = &self.processed_paths {
            ring.push(PendingChangeLogEntry::new(
                change,
                outcome.errcode,
                outcome.stat.as_ref(),
            ));
        }
    }

    /// Reconcile one path with an lstat of it.
    pub(crate) fn stat_path(
        &self,
        db: &mut ViewDatabase,
        coll: &mut PendingChanges,
        change: &PendingChange,
        stamp: ClockStamp,
    ) -> StatOutcome {
        let path = change.path.as_path();
        let (Some(parent_path), Some(name)) = (path.parent(), path.file_name()) else {
            return StatOutcome::default();
        };
        let Some(dir) = db.resolve_or_create_dir(parent_path) else {
            tracing::trace!(path = %path.display(), "Ignoring change outside the root");
            return StatOutcome::default();
        };

        let via_notify = change.flags.contains(PendingFlags::VIA_NOTIFY);
        let existing = db.dir(dir).child_file(name);
        let dir_ent = db.dir(dir).child_dir(name);

        let result = match &change.pre_stat {
            Some(stat) => Ok(stat.clone()),
            None => self.watcher.stat(path),
        };

        let st = match result {
            Ok(st) => st,
            Err(e) => {
                let errcode = e.raw_os_error();
                self.handle_stat_error(db, coll, change, &e, dir, existing, dir_ent, stamp);
                return StatOutcome {
                    errcode,
                    stat: None,
                };
            }
        };

        let file = existing.unwrap_or_else(|| db.get_or_create_child_file(dir, name, stamp));
        let was_existing = existing.is_some() && db.file(file).exists;
        let changed = !was_existing || via_notify || db.file(file).stat.differs_from(&st);

        {
            let entry = db.file_mut(file);
            if !entry.exists {
                entry.ctime = stamp;
            }
            entry.exists = true;
            entry.maybe_deleted = false;
        }
        if changed {
            tracing::trace!(path = %path.display(), ticks = stamp.ticks, "File changed");
            db.mark_file_changed(file, stamp);
        }
        db.file_mut(file).stat = st.clone();

        if st.is_dir() {
            self.queue_dir_scan(db, coll, change, dir_ent, changed);
        } else if let Some(old_dir) = dir_ent {
            // Was a directory; whatever was below it is gone.
            db.mark_dir_deleted(old_dir, stamp, true);
        }

        if changed && via_notify {
            self.propagate_to_parent_dir_if_appropriate(coll, path, change.now, false, st.is_dir());
        }

        StatOutcome {
            errcode: None,
            stat: Some(st),
        }
    }

    fn queue_dir_scan(
        &self,
        db: &mut ViewDatabase,
        coll: &mut PendingChanges,
        change: &PendingChange,
        dir_ent: Option<DirId>,
        changed: bool,
    ) {
        let path = change.path.as_path();
        if path
            .parent()
            .is_some_and(|parent| self.ignore.is_vcs_dir(parent))
        {
            return;
        }

        let recursive = dir_ent.map_or(true, |d| !db.dir(d).last_check_existed())
            || change.flags.intersects(PendingFlags::RECURSIVE | PendingFlags::IS_DESYNCED);
        if db.resolve_or_create_dir(path).is_none() {
            return;
        }

        let watcher_flags = self.watcher.flags();
        // A coalesced rename may move children without reporting them, so a
        // notified directory has every child re-stat'd.
        let stat_children = change.flags.contains(PendingFlags::NONRECURSIVE_SCAN)
            || (change.flags.contains(PendingFlags::VIA_NOTIFY)
                && watcher_flags.contains(WatcherFlags::COALESCED_RENAME));
        if recursive || !watcher_flags.contains(WatcherFlags::HAS_PER_FILE_NOTIFICATIONS) {
            coll.add(path, change.now, PendingFlags::RECURSIVE | PendingFlags::CRAWL_ONLY);
        } else if stat_children {
            coll.add(
                path,
                change.now,
                PendingFlags::NONRECURSIVE_SCAN | PendingFlags::CRAWL_ONLY,
            );
        } else if changed {
            coll.add(path, change.now, PendingFlags::CRAWL_ONLY);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_stat_error(
        &self,
        db: &mut ViewDatabase,
        coll: &mut PendingChanges,
        change: &PendingChange,
        err: &io::Error,
        dir: DirId,
        existing: Option<FileId>,
        dir_ent: Option<DirId>,
        stamp: ClockStamp,
    ) {
        let path = change.path.as_path();
        let via_notify = change.flags.contains(PendingFlags::VIA_NOTIFY);

        if !is_not_found(err) {
            STAT_ERRORS.inc();
            let failure = ViewError::StatFailure {
                path: path.to_path_buf(),
                errcode: err.raw_os_error(),
            };
            tracing::warn!(error = %failure, reason = %err, "Treating entry as deleted");
        }

        // Created and removed before we ever saw it: record the tombstone
        // so time queries still report the deletion.
        let file = match existing {
            Some(file) => Some(file),
            None if via_notify => path
                .file_name()
                .map(|name| db.get_or_create_child_file(dir, name, stamp)),
            None => None,
        };

        if let Some(file) = file {
            if db.file(file).exists {
                db.file_mut(file).exists = false;
                db.mark_file_changed(file, stamp);
                tracing::trace!(path = %path.display(), ticks = stamp.ticks, "File deleted");
            }
        }
        if let Some(old_dir) = dir_ent {
            db.mark_dir_deleted(old_dir, stamp, true);
        }

        if via_notify {
            self.propagate_to_parent_dir_if_appropriate(coll, path, change.now, true, false);
        }
    }

    /// List a directory and reconcile its children.
    pub(crate) fn crawler(
        &self,
        db: &mut ViewDatabase,
        coll: &mut PendingChanges,
        change: &PendingChange,
        stamp: ClockStamp,
    ) {
        let path = change.path.as_path();
        let recursive = change.flags.contains(PendingFlags::RECURSIVE);
        let stat_all = if self
            .watcher
            .flags()
            .contains(WatcherFlags::HAS_PER_FILE_NOTIFICATIONS)
        {
            change.flags.contains(PendingFlags::NONRECURSIVE_SCAN)
        } else {
            recursive
        };

        let Some(dir) = db.resolve_or_create_dir(path) else {
            return;
        };

        if path == self.root_path && !self.check_root_identity(db, stamp) {
            return;
        }

        tracing::debug!(dir = %path.display(), recursive, stat_all, "Crawling");

        let entries = match self.watcher.start_watch_dir(path) {
            Ok(entries) => entries,
            Err(e) if is_not_found(&e) => {
                tracing::debug!(dir = %path.display(), "Directory vanished before it was crawled");
                db.mark_dir_deleted(dir, stamp, true);
                return;
            }
            Err(e) => {
                STAT_ERRORS.inc();
                tracing::warn!(dir = %path.display(), error = %e, "Failed to list directory");
                return;
            }
        };

        db.dir_mut(dir).last_check_existed = true;

        let known: Vec<FileId> = db.dir(dir).files().map(|(_, id)| id).collect();
        for &id in &known {
            let file = db.file_mut(id);
            if file.exists {
                file.maybe_deleted = true;
            }
        }

        let child_flags = if recursive {
            PendingFlags::RECURSIVE
        } else {
            PendingFlags::empty()
        };
        for entry in entries {
            let child_path = path.join(&entry.name);
            if self.cookies.is_cookie_path(&child_path) {
                self.cookies.notify_cookie(&child_path);
                continue;
            }
            if self.ignore.is_ignored(&child_path) {
                continue;
            }

            let existing = db.dir(dir).child_file(&entry.name);
            let needs_stat = match existing {
                Some(id) => {
                    let file = db.file_mut(id);
                    file.maybe_deleted = false;
                    stat_all || recursive || !file.exists
                }
                None => true,
            };
            if needs_stat {
                coll.add_with_stat(child_path, change.now, child_flags, entry.stat);
            }
        }

        // Anything not seen in the listing gets stat'd to confirm it is gone.
        for id in known {
            if db.file(id).maybe_deleted {
                let child_path = path.join(db.file(id).name());
                coll.add(child_path, change.now, child_flags);
            }
        }
    }

    /// Returns false if the root was replaced or removed and a recrawl (or
    /// shutdown) has been arranged instead.
    fn check_root_identity(&self, db: &mut ViewDatabase, stamp: ClockStamp) -> bool {
        match self.watcher.stat(&self.root_path) {
            Ok(st) => {
                let known = db.root_inode();
                if known != 0 && known != st.ino {
                    let mismatch = ViewError::RootIdentityMismatch {
                        expected: known,
                        actual: st.ino,
                    };
                    tracing::error!(root = %self.root_path.display(), error = %mismatch, "Root was replaced");
                    db.set_root_inode(st.ino);
                    self.schedule_recrawl(&mismatch.to_string());
                    return false;
                }
                db.set_root_inode(st.ino);
                true
            }
            Err(e) => {
                tracing::error!(root = %self.root_path.display(), error = %e, "Root is no longer accessible");
                let root = db.root_dir();
                db.mark_dir_deleted(root, stamp, true);
                if is_not_found(&e) {
                    self.cancel.cancel();
                    self.pending.ping();
                }
                false
            }
        }
    }

    /// Re-queue the parent of a changed entry, for backends that do not
    /// report directory changes caused by their children.
    fn propagate_to_parent_dir_if_appropriate(
        &self,
        coll: &mut PendingChanges,
        path: &Path,
        now: SystemTime,
        is_unlink: bool,
        is_dir: bool,
    ) {
        if !self.config.propagate_to_parent_dirs || !(is_unlink || !is_dir) {
            return;
        }
        let Some(parent) = path.parent() else {
            return;
        };
        if parent == self.root_path || !parent.starts_with(&self.root_path) {
            return;
        }
        coll.add(parent, now, PendingFlags::VIA_NOTIFY);
    }
}
