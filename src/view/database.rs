//! The tree + recency-list index for one watched root.
//!
//! Files are ordered in a linked recency index as well as hierarchically
//! from the root. Entries live in arenas and refer to each other through
//! handles; the parent link is never an owner.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use super::arena::Arena;
use super::clock::ClockStamp;
use super::entry::{DirId, FileId, TrackedDir, TrackedFile};
use crate::watcher::FileInformation;

/// Result of an age-out sweep over the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeOutOutcome {
    pub files_removed: usize,
    pub dirs_removed: usize,
    /// Largest otime tick among the evicted files.
    pub max_tick: u32,
}

/// In-memory representation of the watched root.
#[derive(Debug)]
pub struct ViewDatabase {
    root_path: PathBuf,
    files: Arena<TrackedFile>,
    dirs: Arena<TrackedDir>,
    root_dir: DirId,
    /// The most recently changed file.
    latest_file: Option<FileId>,
    /// The least recently changed file.
    oldest_file: Option<FileId>,
    // Used to detect the root being swapped out from under us, e.g. by
    // filesystems that do not deliver events for subvolume replacement.
    root_inode: u64,
}

impl ViewDatabase {
    #[must_use]
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        let root_path = root_path.into();
        let mut dirs = Arena::default();
        let root_dir = DirId(dirs.insert(TrackedDir::new(root_path.clone(), None)));
        Self {
            root_path,
            files: Arena::default(),
            dirs,
            root_dir,
            latest_file: None,
            oldest_file: None,
            root_inode: 0,
        }
    }

    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    #[must_use]
    pub const fn root_dir(&self) -> DirId {
        self.root_dir
    }

    #[must_use]
    pub const fn latest_file(&self) -> Option<FileId> {
        self.latest_file
    }

    #[must_use]
    pub const fn oldest_file(&self) -> Option<FileId> {
        self.oldest_file
    }

    #[must_use]
    pub const fn root_inode(&self) -> u64 {
        self.root_inode
    }

    pub fn set_root_inode(&mut self, ino: u64) {
        self.root_inode = ino;
    }

    #[must_use]
    pub const fn num_files(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub const fn num_dirs(&self) -> usize {
        self.dirs.len()
    }

    /// # Panics
    ///
    /// Panics if the handle no longer refers to a tracked file, which only
    /// happens if a handle is kept across an age-out.
    #[must_use]
    pub fn file(&self, id: FileId) -> &TrackedFile {
        self.files
            .get(id.0)
            .expect("file handle outlived its entry")
    }

    /// # Panics
    ///
    /// Panics if the handle no longer refers to a tracked directory.
    #[must_use]
    pub fn dir(&self, id: DirId) -> &TrackedDir {
        self.dirs
            .get(id.0)
            .expect("directory handle outlived its entry")
    }

    pub(crate) fn file_mut(&mut self, id: FileId) -> &mut TrackedFile {
        self.files
            .get_mut(id.0)
            .expect("file handle outlived its entry")
    }

    pub(crate) fn dir_mut(&mut self, id: DirId) -> &mut TrackedDir {
        self.dirs
            .get_mut(id.0)
            .expect("directory handle outlived its entry")
    }

    /// Absolute path of a tracked file.
    #[must_use]
    pub fn file_path(&self, id: FileId) -> PathBuf {
        let file = self.file(id);
        self.dir(file.parent).path.join(&file.name)
    }

    /// Walk `path` down from the root without creating anything.
    ///
    /// Returns `None` when the path is outside the root or any component is
    /// not (yet) known; this is routine while a crawl is still running.
    #[must_use]
    pub fn resolve_dir(&self, path: &Path) -> Option<DirId> {
        let relative = path.strip_prefix(&self.root_path).ok()?;
        let mut current = self.root_dir;
        for component in relative.components() {
            match component {
                Component::Normal(name) => current = self.dir(current).child_dir(name)?,
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(current)
    }

    /// Walk `path` down from the root, materializing missing directories.
    ///
    /// Returns `None` only when the path is outside the root.
    pub fn resolve_or_create_dir(&mut self, path: &Path) -> Option<DirId> {
        let relative = path.strip_prefix(&self.root_path).ok()?.to_path_buf();
        let mut current = self.root_dir;
        for component in relative.components() {
            match component {
                Component::Normal(name) => {
                    current = match self.dir(current).child_dir(name) {
                        Some(child) => child,
                        None => self.create_child_dir(current, name),
                    };
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(current)
    }

    fn create_child_dir(&mut self, parent: DirId, name: &OsStr) -> DirId {
        let path = self.dir(parent).path.join(name);
        let id = DirId(self.dirs.insert(TrackedDir::new(path, Some(parent))));
        self.dir_mut(parent).dirs.insert(name.to_os_string(), id);
        id
    }

    /// Returns the direct child file named `name` if it already exists,
    /// else creates that entry at the head of the recency list.
    pub fn get_or_create_child_file(&mut self, dir: DirId, name: &OsStr, ctime: ClockStamp) -> FileId {
        if let Some(existing) = self.dir(dir).child_file(name) {
            return existing;
        }

        let file = TrackedFile {
            name: name.to_os_string(),
            parent: dir,
            exists: true,
            maybe_deleted: false,
            stat: FileInformation::default(),
            ctime,
            otime: ctime,
            prev: None,
            next: None,
        };
        let id = FileId(self.files.insert(file));
        self.dir_mut(dir).files.insert(name.to_os_string(), id);
        self.insert_at_head_of_file_list(id);
        id
    }

    /// Updates the otime for the file and bubbles it to the front of the
    /// recency index.
    pub fn mark_file_changed(&mut self, id: FileId, otime: ClockStamp) {
        self.file_mut(id).otime = otime;
        if self.latest_file == Some(id) {
            return;
        }
        self.unlink_from_file_list(id);
        self.insert_at_head_of_file_list(id);
    }

    /// Tombstone every direct child of `dir` at `otime`. With `recursive`,
    /// continues into child directories after marking this one. The
    /// directory nodes themselves are kept.
    pub fn mark_dir_deleted(&mut self, dir: DirId, otime: ClockStamp, recursive: bool) {
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let node = self.dir_mut(current);
            if !node.last_check_existed {
                continue;
            }
            node.last_check_existed = false;
            tracing::trace!(dir = %node.path.display(), "Marking directory deleted");

            let children: Vec<FileId> = node.files.values().copied().collect();
            for child in children {
                if self.file(child).exists {
                    self.file_mut(child).exists = false;
                    self.mark_file_changed(child, otime);
                }
            }

            if recursive {
                stack.extend(self.dir(current).dirs.values().copied());
            }
        }
    }

    /// Iterate files from most to least recently changed.
    #[must_use]
    pub fn recency(&self) -> Recency<'_> {
        Recency {
            db: self,
            cursor: self.latest_file,
        }
    }

    /// Check that every file is on the recency list exactly once and that
    /// the list is ordered by non-increasing otime tick.
    #[must_use]
    pub fn recency_list_is_consistent(&self) -> bool {
        let mut seen = HashSet::new();
        let mut last_tick = u32::MAX;
        let mut prev: Option<FileId> = None;
        for (id, file) in self.recency() {
            if !seen.insert(id) || file.otime.ticks > last_tick || file.prev != prev {
                return false;
            }
            last_tick = file.otime.ticks;
            prev = Some(id);
        }
        seen.len() == self.files.len() && self.oldest_file == prev
    }

    /// Evict tombstoned files whose otime is older than `cutoff`, then any
    /// directory nodes left with nothing below them.
    pub(crate) fn age_out(&mut self, cutoff: SystemTime) -> AgeOutOutcome {
        let mut outcome = AgeOutOutcome::default();

        let mut doomed = Vec::new();
        let mut cursor = self.oldest_file;
        while let Some(id) = cursor {
            let file = self.file(id);
            cursor = file.prev;
            if !file.exists && file.otime.timestamp < cutoff {
                doomed.push(id);
            }
        }

        let mut candidates = Vec::new();
        for id in doomed {
            let file = self.file(id);
            let parent = file.parent;
            let name = file.name.clone();
            outcome.max_tick = outcome.max_tick.max(file.otime.ticks);
            if let Some(child_dir) = self.dir(parent).child_dir(&name) {
                candidates.push(child_dir);
            }
            candidates.push(parent);

            self.unlink_from_file_list(id);
            self.dir_mut(parent).files.remove(&name);
            self.files.remove(id.0);
            outcome.files_removed += 1;
        }

        // Deepest first, so a node is reconsidered after its children go.
        candidates.sort_by_key(|d| (Reverse(self.dir(*d).path.components().count()), *d));
        candidates.dedup();
        for dir in candidates {
            let mut cursor = Some(dir);
            while let Some(current) = cursor {
                if self.dirs.get(current.0).is_none() || !self.is_reclaimable(current) {
                    break;
                }
                cursor = self.dir(current).parent;
                outcome.dirs_removed += self.erase_dir(current);
            }
        }

        outcome
    }

    /// A directory node can go once nothing is tracked below it and its
    /// parent holds no file entry for it. The root is never reclaimable.
    fn is_reclaimable(&self, dir: DirId) -> bool {
        let node = self.dir(dir);
        let Some(parent) = node.parent else {
            return false;
        };
        let named_by_parent = node
            .path
            .file_name()
            .is_some_and(|name| self.dir(parent).child_file(name).is_some());
        !named_by_parent && self.subtree_is_empty(dir)
    }

    fn subtree_is_empty(&self, dir: DirId) -> bool {
        let node = self.dir(dir);
        node.files.is_empty() && node.dirs.values().all(|d| self.subtree_is_empty(*d))
    }

    fn erase_dir(&mut self, dir: DirId) -> usize {
        if let Some(parent) = self.dir(dir).parent {
            let name = self.dir(dir).path.file_name().map(OsStr::to_os_string);
            if let Some(name) = name {
                self.dir_mut(parent).dirs.remove(&name);
            }
        }

        let mut removed = 0;
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.dirs.remove(current.0) {
                stack.extend(node.dirs.into_values());
                removed += 1;
            }
        }
        removed
    }

    fn insert_at_head_of_file_list(&mut self, id: FileId) {
        let old_head = self.latest_file;
        {
            let file = self.file_mut(id);
            file.prev = None;
            file.next = old_head;
        }
        match old_head {
            Some(head) => self.file_mut(head).prev = Some(id),
            None => self.oldest_file = Some(id),
        }
        self.latest_file = Some(id);
    }

    fn unlink_from_file_list(&mut self, id: FileId) {
        let (prev, next) = {
            let file = self.file_mut(id);
            (file.prev.take(), file.next.take())
        };
        match prev {
            Some(p) => self.file_mut(p).next = next,
            None => self.latest_file = next,
        }
        match next {
            Some(n) => self.file_mut(n).prev = prev,
            None => self.oldest_file = prev,
        }
    }
}

/// Iterator over the recency list, newest first.
pub struct Recency<'a> {
    db: &'a ViewDatabase,
    cursor: Option<FileId>,
}

impl<'a> Iterator for Recency<'a> {
    type Item = (FileId, &'a TrackedFile);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let file = self.db.file(id);
        self.cursor = file.next;
        Some((id, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::time::Duration;

    fn stamp(ticks: u32) -> ClockStamp {
        ClockStamp::new(ticks, SystemTime::UNIX_EPOCH + Duration::from_secs(u64::from(ticks)))
    }

    fn names(db: &ViewDatabase) -> Vec<OsString> {
        db.recency().map(|(_, f)| f.name.clone()).collect()
    }

    #[test]
    fn test_resolve_dir_without_create() {
        let mut db = ViewDatabase::new("/root");
        assert_eq!(db.resolve_dir(Path::new("/root")), Some(db.root_dir()));
        assert_eq!(db.resolve_dir(Path::new("/root/a/b")), None);
        assert_eq!(db.resolve_dir(Path::new("/elsewhere")), None);

        let created = db.resolve_or_create_dir(Path::new("/root/a/b")).unwrap();
        assert_eq!(db.resolve_dir(Path::new("/root/a/b")), Some(created));
        assert_eq!(db.dir(created).path(), Path::new("/root/a/b"));
        assert_eq!(db.num_dirs(), 3);
    }

    #[test]
    fn test_resolve_or_create_outside_root() {
        let mut db = ViewDatabase::new("/root");
        assert!(db.resolve_or_create_dir(Path::new("/other/x")).is_none());
    }

    #[test]
    fn test_get_or_create_child_file_is_idempotent() {
        let mut db = ViewDatabase::new("/root");
        let root = db.root_dir();
        let a = db.get_or_create_child_file(root, OsStr::new("a"), stamp(1));
        let again = db.get_or_create_child_file(root, OsStr::new("a"), stamp(5));
        assert_eq!(a, again);
        assert_eq!(db.file(a).ctime().ticks, 1);
        assert_eq!(db.num_files(), 1);
        assert_eq!(db.file_path(a), PathBuf::from("/root/a"));
    }

    #[test]
    fn test_new_files_go_to_head() {
        let mut db = ViewDatabase::new("/root");
        let root = db.root_dir();
        db.get_or_create_child_file(root, OsStr::new("a"), stamp(1));
        db.get_or_create_child_file(root, OsStr::new("b"), stamp(2));
        db.get_or_create_child_file(root, OsStr::new("c"), stamp(3));
        assert_eq!(names(&db), vec!["c", "b", "a"]);
        assert!(db.recency_list_is_consistent());
    }

    #[test]
    fn test_mark_file_changed_moves_to_head_once() {
        let mut db = ViewDatabase::new("/root");
        let root = db.root_dir();
        let a = db.get_or_create_child_file(root, OsStr::new("a"), stamp(1));
        db.get_or_create_child_file(root, OsStr::new("b"), stamp(2));

        db.mark_file_changed(a, stamp(3));
        db.mark_file_changed(a, stamp(3));
        assert_eq!(names(&db), vec!["a", "b"]);
        assert_eq!(db.latest_file(), Some(a));
        assert!(db.recency_list_is_consistent());
    }

    #[test]
    fn test_mark_dir_deleted_recursive() {
        let mut db = ViewDatabase::new("/root");
        let sub = db.resolve_or_create_dir(Path::new("/root/sub")).unwrap();
        let deep = db.resolve_or_create_dir(Path::new("/root/sub/deep")).unwrap();
        let f1 = db.get_or_create_child_file(sub, OsStr::new("f1"), stamp(1));
        let f2 = db.get_or_create_child_file(deep, OsStr::new("f2"), stamp(1));

        db.mark_dir_deleted(sub, stamp(2), false);
        assert!(!db.file(f1).exists());
        assert!(db.file(f2).exists());

        db.dir_mut(sub).last_check_existed = true;
        db.mark_dir_deleted(sub, stamp(3), true);
        assert!(!db.file(f2).exists());
        assert_eq!(db.file(f2).otime().ticks, 3);
        // Nodes are tombstoned, never removed.
        assert_eq!(db.resolve_dir(Path::new("/root/sub/deep")), Some(deep));
        assert!(db.recency_list_is_consistent());
    }

    #[test]
    fn test_age_out_removes_old_tombstones_only() {
        let mut db = ViewDatabase::new("/root");
        let root = db.root_dir();
        let old = db.get_or_create_child_file(root, OsStr::new("old"), stamp(1));
        let alive = db.get_or_create_child_file(root, OsStr::new("alive"), stamp(1));
        let young = db.get_or_create_child_file(root, OsStr::new("young"), stamp(2));

        db.file_mut(old).exists = false;
        db.mark_file_changed(old, stamp(10));
        db.mark_file_changed(alive, stamp(11));
        db.file_mut(young).exists = false;
        db.mark_file_changed(young, stamp(100));
        assert!(db.recency_list_is_consistent());

        let outcome = db.age_out(SystemTime::UNIX_EPOCH + Duration::from_secs(50));
        assert_eq!(outcome.files_removed, 1);
        assert_eq!(outcome.max_tick, 10);
        assert_eq!(db.dir(root).child_file(OsStr::new("old")), None);
        assert!(db.dir(root).child_file(OsStr::new("young")).is_some());
        assert!(db.dir(root).child_file(OsStr::new("alive")).is_some());
        assert!(db.recency_list_is_consistent());
    }

    #[test]
    fn test_age_out_erases_empty_dir_nodes() {
        let mut db = ViewDatabase::new("/root");
        let root = db.root_dir();
        let dir_entry = db.get_or_create_child_file(root, OsStr::new("gone"), stamp(1));
        let gone = db.resolve_or_create_dir(Path::new("/root/gone")).unwrap();
        let inner = db.get_or_create_child_file(gone, OsStr::new("x"), stamp(1));

        db.file_mut(dir_entry).exists = false;
        db.mark_file_changed(dir_entry, stamp(2));
        db.mark_dir_deleted(gone, stamp(2), true);
        assert!(!db.file(inner).exists());

        let outcome = db.age_out(SystemTime::UNIX_EPOCH + Duration::from_secs(1000));
        assert_eq!(outcome.files_removed, 2);
        assert_eq!(outcome.dirs_removed, 1);
        assert_eq!(db.resolve_dir(Path::new("/root/gone")), None);
        assert_eq!(db.num_files(), 0);
        assert!(db.recency().next().is_none());
    }

    #[test]
    fn test_age_out_reclaims_dirs_created_for_vanished_paths() {
        let mut db = ViewDatabase::new("/root");
        for i in 0..50 {
            let dir = db
                .resolve_or_create_dir(Path::new(&format!("/root/tmp{i}")))
                .unwrap();
            let ghost = db.get_or_create_child_file(dir, OsStr::new("x"), stamp(i + 1));
            db.file_mut(ghost).exists = false;
        }
        let kept = db.resolve_or_create_dir(Path::new("/root/kept/deeper")).unwrap();
        db.get_or_create_child_file(kept, OsStr::new("live"), stamp(60));
        assert_eq!(db.num_dirs(), 53);

        let outcome = db.age_out(SystemTime::UNIX_EPOCH + Duration::from_secs(1000));
        assert_eq!(outcome.files_removed, 50);
        assert_eq!(outcome.dirs_removed, 50);
        assert_eq!(db.num_dirs(), 3);
        assert_eq!(db.resolve_dir(Path::new("/root/tmp7")), None);
        assert_eq!(db.resolve_dir(Path::new("/root/kept/deeper")), Some(kept));
        assert!(db.recency_list_is_consistent());
    }

    #[test]
    fn test_age_out_keeps_dir_named_by_a_live_entry() {
        let mut db = ViewDatabase::new("/root");
        let root = db.root_dir();
        db.get_or_create_child_file(root, OsStr::new("empty"), stamp(1));
        let empty = db.resolve_or_create_dir(Path::new("/root/empty")).unwrap();
        let gone = db.get_or_create_child_file(empty, OsStr::new("gone"), stamp(1));
        db.file_mut(gone).exists = false;
        db.mark_file_changed(gone, stamp(2));

        let outcome = db.age_out(SystemTime::UNIX_EPOCH + Duration::from_secs(1000));
        assert_eq!(outcome.files_removed, 1);
        assert_eq!(outcome.dirs_removed, 0);
        assert_eq!(db.resolve_dir(Path::new("/root/empty")), Some(empty));
    }
}
