//! Fixed-size log of recently processed pending changes, kept for
//! postmortem inspection through the debug accessors.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::watcher::{FileInformation, PendingChange};

/// Bytes of the path kept per entry, counted from the end.
const PATH_TAIL_LEN: usize = 55;

/// Bounded FIFO; the oldest entry is dropped once capacity is reached.
#[derive(Debug)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
}

impl<T: Clone> RingBuffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, item: T) {
        if self.capacity == 0 {
            return;
        }
        let mut items = self.items.lock();
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    /// Copy of the current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

/// One processed pending change and what stat reported for it.
#[derive(Debug, Clone, Serialize)]
pub struct PendingChangeLogEntry {
    pub timestamp: DateTime<Utc>,
    pub pending_flags: u8,
    pub path_tail: String,
    pub errcode: Option<i32>,
    pub mode: u32,
    pub size: u64,
    pub mtime: i64,
}

impl PendingChangeLogEntry {
    #[must_use]
    pub fn new(change: &PendingChange, errcode: Option<i32>, stat: Option<&FileInformation>) -> Self {
        Self {
            timestamp: DateTime::<Utc>::from(change.now),
            pending_flags: change.flags.bits(),
            path_tail: path_tail(&change.path),
            errcode,
            mode: stat.map_or(0, |s| s.mode),
            size: stat.map_or(0, |s| s.size),
            mtime: stat.map_or(0, FileInformation::mtime_secs),
        }
    }
}

fn path_tail(path: &Path) -> String {
    let full = path.to_string_lossy();
    if full.len() <= PATH_TAIL_LEN {
        return full.into_owned();
    }
    let mut start = full.len() - PATH_TAIL_LEN;
    while !full.is_char_boundary(start) {
        start += 1;
    }
    full[start..].to_string()
}
