//! `FileResult` over a snapshot of one tracked file.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::unsync::OnceCell;

use super::clock::ClockStamp;
use super::entry::TrackedFile;
use crate::cache::{ContentHash, ContentHashCacheKey, InMemoryViewCaches, SymlinkTargetCacheKey};
use crate::query::FileResult;
use crate::watcher::FileInformation;

/// A tracked file as seen by one query.
///
/// Attributes are copied out of the view while the query holds its read
/// lock; derived data is fetched through the caches on first use.
pub struct InMemoryFileResult {
    name: OsString,
    /// Relative to the query root.
    dir_name: PathBuf,
    /// Relative to the watched root; used for cache keys.
    root_relative: PathBuf,
    exists: bool,
    stat: FileInformation,
    ctime: ClockStamp,
    otime: ClockStamp,
    caches: Arc<InMemoryViewCaches>,
    symlink_target: OnceCell<Option<PathBuf>>,
    content_hash: OnceCell<Option<ContentHash>>,
}

impl InMemoryFileResult {
    pub(crate) fn new(
        file: &TrackedFile,
        dir_name: PathBuf,
        root_relative_dir: &Path,
        caches: Arc<InMemoryViewCaches>,
    ) -> Self {
        Self {
            name: file.name.clone(),
            root_relative: root_relative_dir.join(&file.name),
            dir_name,
            exists: file.exists,
            stat: file.stat.clone(),
            ctime: file.ctime,
            otime: file.otime,
            caches,
            symlink_target: OnceCell::new(),
            content_hash: OnceCell::new(),
        }
    }
}

impl FileResult for InMemoryFileResult {
    fn stat(&self) -> Option<&FileInformation> {
        self.exists.then_some(&self.stat)
    }

    fn base_name(&self) -> &OsStr {
        &self.name
    }

    fn dir_name(&self) -> &Path {
        &self.dir_name
    }

    fn exists(&self) -> bool {
        self.exists
    }

    fn read_link(&self) -> Option<PathBuf> {
        if !self.exists || !self.stat.is_symlink() {
            return None;
        }
        self.symlink_target
            .get_or_init(|| {
                self.caches
                    .symlink_target
                    .get(SymlinkTargetCacheKey {
                        relative_path: self.root_relative.clone(),
                        mtime: self.stat.mtime,
                    })
                    .ok()
            })
            .clone()
    }

    fn ctime(&self) -> ClockStamp {
        self.ctime
    }

    fn otime(&self) -> ClockStamp {
        self.otime
    }

    fn content_hash(&self) -> Option<ContentHash> {
        let key = self.content_hash_key()?;
        *self
            .content_hash
            .get_or_init(|| self.caches.content_hash.get(key).ok())
    }

    fn content_hash_key(&self) -> Option<ContentHashCacheKey> {
        (self.exists && self.stat.is_file())
            .then(|| ContentHashCacheKey::new(self.root_relative.clone(), &self.stat))
    }

    fn batch_fetch_properties(&self, files: &[Box<dyn FileResult>]) {
        let keys: Vec<ContentHashCacheKey> =
            files.iter().filter_map(|f| f.content_hash_key()).collect();
        self.caches.content_hash.prefetch(keys);
    }
}
