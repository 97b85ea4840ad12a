//! Pending filesystem changes awaiting the mutator.
//!
//! `PendingChanges` is the unsynchronized set the mutator works through;
//! `PendingCollection` wraps one behind a lock and condvar so the notify
//! thread (and anyone requesting a recrawl) can feed it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

use super::stat::FileInformation;

bitflags! {
    /// How a pending path should be processed.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct PendingFlags: u8 {
        /// Crawl everything below this path.
        const RECURSIVE = 0x01;
        /// The change was reported by the watcher rather than discovered by a crawl.
        const VIA_NOTIFY = 0x02;
        /// Only list the directory; do not stat the path itself.
        const CRAWL_ONLY = 0x04;
        /// The watcher lost events before producing this change.
        const IS_DESYNCED = 0x08;
        /// Stat every child when crawling, even with per-file notifications.
        const NONRECURSIVE_SCAN = 0x10;
    }
}

/// One path waiting to be reconciled with the filesystem.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub path: PathBuf,
    pub now: SystemTime,
    pub flags: PendingFlags,
    /// Stat obtained while listing the parent directory, if any.
    pub pre_stat: Option<FileInformation>,
}

impl PendingChange {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, now: SystemTime, flags: PendingFlags) -> Self {
        Self {
            path: path.into(),
            now,
            flags,
            pre_stat: None,
        }
    }
}

/// Coalescing set of pending changes, iterated in path order so parents are
/// processed before their children.
#[derive(Debug, Default)]
pub struct PendingChanges {
    items: BTreeMap<PathBuf, PendingChange>,
}

impl PendingChanges {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a path. Returns false if the change was absorbed by a pending
    /// recursive ancestor.
    pub fn add(&mut self, path: impl Into<PathBuf>, now: SystemTime, flags: PendingFlags) -> bool {
        self.insert(PendingChange::new(path, now, flags))
    }

    /// Queue a path together with a stat gathered while listing its parent.
    pub fn add_with_stat(
        &mut self,
        path: impl Into<PathBuf>,
        now: SystemTime,
        flags: PendingFlags,
        stat: Option<FileInformation>,
    ) -> bool {
        let mut change = PendingChange::new(path, now, flags);
        change.pre_stat = stat;
        self.insert(change)
    }

    /// Queue a fully formed change.
    pub fn insert(&mut self, change: PendingChange) -> bool {
        if self.is_obsoleted_by_ancestor(&change.path) {
            return false;
        }

        if change.flags.contains(PendingFlags::RECURSIVE) {
            self.remove_descendants(&change.path);
        }

        match self.items.get_mut(&change.path) {
            Some(existing) => {
                existing.flags |= change.flags;
                if change.now > existing.now {
                    existing.now = change.now;
                }
                // A fresh stat is only trustworthy for the newest listing.
                existing.pre_stat = change.pre_stat;
            }
            None => {
                self.items.insert(change.path.clone(), change);
            }
        }
        true
    }

    /// Move every change from `other` into this set.
    pub fn append(&mut self, other: Self) {
        for change in other.items.into_values() {
            self.insert(change);
        }
    }

    /// Take all queued changes, leaving the set empty.
    pub fn steal_items(&mut self) -> Vec<PendingChange> {
        std::mem::take(&mut self.items).into_values().collect()
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&PendingChange> {
        self.items.get(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn is_obsoleted_by_ancestor(&self, path: &Path) -> bool {
        path.ancestors().skip(1).any(|ancestor| {
            self.items
                .get(ancestor)
                .is_some_and(|p| p.flags.contains(PendingFlags::RECURSIVE))
        })
    }

    fn remove_descendants(&mut self, path: &Path) {
        // Descendants sort directly after their ancestor in component order.
        let doomed: Vec<PathBuf> = self
            .items
            .range::<Path, _>((std::ops::Bound::Excluded(path), std::ops::Bound::Unbounded))
            .map(|(p, _)| p)
            .take_while(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in doomed {
            self.items.remove(&p);
        }
    }
}

#[derive(Debug, Default)]
struct PendingState {
    changes: PendingChanges,
    pinged: bool,
}

/// Thread-safe pending queue shared between producers and the mutator.
#[derive(Debug, Default)]
pub struct PendingCollection {
    state: Mutex<PendingState>,
    cond: Condvar,
}

impl PendingCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a path and wake the consumer.
    pub fn add(&self, path: impl Into<PathBuf>, now: SystemTime, flags: PendingFlags) -> bool {
        let added = self.state.lock().changes.add(path, now, flags);
        if added {
            self.cond.notify_all();
        }
        added
    }

    /// Queue many changes under a single lock acquisition.
    pub fn add_all(&self, changes: impl IntoIterator<Item = PendingChange>) -> bool {
        let mut state = self.state.lock();
        let mut added = false;
        for change in changes {
            added |= state.changes.insert(change);
        }
        drop(state);
        if added {
            self.cond.notify_all();
        }
        added
    }

    /// Wake the consumer without queueing anything.
    pub fn ping(&self) {
        self.state.lock().pinged = true;
        self.cond.notify_all();
    }

    /// Block until there is work, a ping, or the timeout elapses.
    ///
    /// Returns true if woken by work or a ping; the ping flag is reset.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.changes.is_empty() && !state.pinged {
            let _ = self.cond.wait_for(&mut state, timeout);
        }
        let woken = state.pinged || !state.changes.is_empty();
        state.pinged = false;
        woken
    }

    /// Take everything that is queued.
    pub fn steal_items(&self) -> PendingChanges {
        std::mem::take(&mut self.state.lock().changes)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().changes.is_empty()
    }
}
