//! The query-facing view of one file.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::cache::{ContentHash, ContentHashCacheKey};
use crate::view::ClockStamp;
use crate::watcher::FileInformation;

/// Metadata accessors shared by every view implementation.
///
/// Cheap attributes come from whatever the view already knows; derived data
/// (symlink targets, content hashes) may be computed lazily. A failure to
/// compute derived data is reported as `None`, never as an error.
pub trait FileResult: Send {
    /// The last stat snapshot, if the file exists.
    fn stat(&self) -> Option<&FileInformation>;

    fn accessed_time(&self) -> Option<SystemTime> {
        self.stat().and_then(|s| s.atime)
    }

    fn modified_time(&self) -> Option<SystemTime> {
        self.stat().and_then(|s| s.mtime)
    }

    fn changed_time(&self) -> Option<SystemTime> {
        self.stat().and_then(|s| s.ctime)
    }

    fn size(&self) -> Option<u64> {
        self.stat().map(|s| s.size)
    }

    fn base_name(&self) -> &OsStr;

    /// Directory containing the file, relative to the query root.
    fn dir_name(&self) -> &Path;

    fn exists(&self) -> bool;

    fn read_link(&self) -> Option<PathBuf>;

    /// When the file was first observed by the view.
    fn ctime(&self) -> ClockStamp;

    /// When the file last changed in the view.
    fn otime(&self) -> ClockStamp;

    fn content_hash(&self) -> Option<ContentHash>;

    /// Cache key for the content hash, for views that memoize hashes.
    fn content_hash_key(&self) -> Option<ContentHashCacheKey> {
        None
    }

    /// Warm derived data for a batch of results at once.
    fn batch_fetch_properties(&self, _files: &[Box<dyn FileResult>]) {}

    /// Path relative to the query root.
    fn relative_path(&self) -> PathBuf {
        self.dir_name().join(self.base_name())
    }
}
