//! The in-memory view: a tree of tracked files and directories plus a
//! recency list, kept in sync with the filesystem by two threads.
//!
//! This module provides:
//! - `ViewDatabase`, the tree and recency list
//! - `InMemoryView`, which owns a database, its threads and its caches
//! - Clock positions, sync cookies and the processed-change ring buffer

mod arena;
mod clock;
mod cookies;
mod database;
mod entry;
mod file_result;
mod generators;
mod ignore;
mod inmemory;
mod pipeline;
mod ring_buffer;
mod threads;

pub use clock::{next_root_number, process_start_time, ClockPosition, ClockSpec, ClockStamp};
pub use cookies::{CookieSync, COOKIE_PREFIX};
pub use database::{AgeOutOutcome, Recency, ViewDatabase};
pub use entry::{DirId, FileId, TrackedDir, TrackedFile};
pub use file_result::InMemoryFileResult;
pub use ignore::IgnoreSet;
pub use inmemory::InMemoryView;
pub use ring_buffer::{PendingChangeLogEntry, RingBuffer};
