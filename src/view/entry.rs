//! Tracked files and directories.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use super::clock::ClockStamp;
use crate::watcher::FileInformation;

/// Handle to a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub(crate) usize);

/// Handle to a tracked directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(pub(crate) usize);

/// One observed filesystem entry.
///
/// Owned by its parent directory's child map; also threaded onto the
/// global recency list through `prev`/`next`.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub(crate) name: OsString,
    pub(crate) parent: DirId,
    pub(crate) exists: bool,
    /// Set while a crawl of the parent has not yet seen this entry.
    pub(crate) maybe_deleted: bool,
    pub(crate) stat: FileInformation,
    pub(crate) ctime: ClockStamp,
    pub(crate) otime: ClockStamp,
    pub(crate) prev: Option<FileId>,
    pub(crate) next: Option<FileId>,
}

impl TrackedFile {
    #[must_use]
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    #[must_use]
    pub const fn parent(&self) -> DirId {
        self.parent
    }

    #[must_use]
    pub const fn exists(&self) -> bool {
        self.exists
    }

    #[must_use]
    pub const fn stat(&self) -> &FileInformation {
        &self.stat
    }

    /// Tick at which the entry first appeared (or reappeared) in the view.
    #[must_use]
    pub const fn ctime(&self) -> ClockStamp {
        self.ctime
    }

    /// Tick at which the entry last changed.
    #[must_use]
    pub const fn otime(&self) -> ClockStamp {
        self.otime
    }
}

/// A namespace node. Never deleted by the pipeline, only by age-out.
#[derive(Debug, Clone)]
pub struct TrackedDir {
    pub(crate) path: PathBuf,
    pub(crate) parent: Option<DirId>,
    pub(crate) files: HashMap<OsString, FileId>,
    pub(crate) dirs: HashMap<OsString, DirId>,
    pub(crate) last_check_existed: bool,
}

impl TrackedDir {
    pub(crate) fn new(path: PathBuf, parent: Option<DirId>) -> Self {
        Self {
            path,
            parent,
            files: HashMap::new(),
            dirs: HashMap::new(),
            last_check_existed: true,
        }
    }

    /// Absolute path of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn parent(&self) -> Option<DirId> {
        self.parent
    }

    #[must_use]
    pub fn child_file(&self, name: &OsStr) -> Option<FileId> {
        self.files.get(name).copied()
    }

    #[must_use]
    pub fn child_dir(&self, name: &OsStr) -> Option<DirId> {
        self.dirs.get(name).copied()
    }

    pub fn files(&self) -> impl Iterator<Item = (&OsStr, FileId)> {
        self.files.iter().map(|(name, id)| (name.as_os_str(), *id))
    }

    pub fn dirs(&self) -> impl Iterator<Item = (&OsStr, DirId)> {
        self.dirs.iter().map(|(name, id)| (name.as_os_str(), *id))
    }

    /// Whether the last look at this directory found it present.
    #[must_use]
    pub const fn last_check_existed(&self) -> bool {
        self.last_check_existed
    }
}
