//! Paths the view never tracks or never descends into.

use std::path::{Path, PathBuf};

/// Ignore rules resolved against one root.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    ignore_dirs: Vec<PathBuf>,
    vcs_dirs: Vec<PathBuf>,
}

impl IgnoreSet {
    /// `ignore_dirs` and `vcs_dirs` are relative to `root`.
    #[must_use]
    pub fn new(root: &Path, ignore_dirs: &[PathBuf], vcs_dirs: &[PathBuf]) -> Self {
        Self {
            ignore_dirs: ignore_dirs.iter().map(|d| root.join(d)).collect(),
            vcs_dirs: vcs_dirs.iter().map(|d| root.join(d)).collect(),
        }
    }

    /// Whether `path` must not be tracked: it is inside an ignored
    /// directory, or more than one level below a VCS directory.
    #[must_use]
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.ignore_dirs.iter().any(|d| path.starts_with(d)) {
            return true;
        }
        self.vcs_dirs.iter().any(|vcs| {
            path.strip_prefix(vcs)
                .is_ok_and(|rest| rest.components().count() >= 2)
        })
    }

    /// Whether `dir` is one of the VCS directories, whose subdirectories
    /// are tracked but not crawled.
    #[must_use]
    pub fn is_vcs_dir(&self, dir: &Path) -> bool {
        self.vcs_dirs.iter().any(|vcs| vcs == dir)
    }
}
