//! Stat snapshots and directory entries supplied by watcher backends.

use std::ffi::OsString;
use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Broad classification of a filesystem entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    #[default]
    Other,
}

/// lstat-equivalent snapshot of one filesystem entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInformation {
    pub kind: FileKind,
    pub mode: u32,
    pub size: u64,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u64,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
    pub ctime: Option<SystemTime>,
}

impl FileInformation {
    /// Build a snapshot from metadata that was obtained without following
    /// symlinks.
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Dir
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };

        #[cfg(unix)]
        let (mode, ino, dev, nlink, ctime) = {
            use std::os::unix::fs::MetadataExt;
            let ctime = u64::try_from(metadata.ctime())
                .ok()
                .map(|secs| {
                    SystemTime::UNIX_EPOCH
                        + std::time::Duration::new(
                            secs,
                            u32::try_from(metadata.ctime_nsec()).unwrap_or(0),
                        )
                });
            (
                metadata.mode(),
                metadata.ino(),
                metadata.dev(),
                metadata.nlink(),
                ctime,
            )
        };
        #[cfg(not(unix))]
        let (mode, ino, dev, nlink, ctime) = (0, 0, 0, 1, metadata.created().ok());

        Self {
            kind,
            mode,
            size: metadata.len(),
            ino,
            dev,
            nlink,
            atime: metadata.accessed().ok(),
            mtime: metadata.modified().ok(),
            ctime,
        }
    }

    /// lstat the given path.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn lstat(path: &Path) -> io::Result<Self> {
        std::fs::symlink_metadata(path).map(|m| Self::from_metadata(&m))
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// Whether anything that identifies the content or type of the entry
    /// differs. Access time is deliberately excluded.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        self.kind != other.kind
            || self.mode != other.mode
            || self.size != other.size
            || self.ino != other.ino
            || self.dev != other.dev
            || self.nlink != other.nlink
            || self.mtime != other.mtime
            || self.ctime != other.ctime
    }

    /// Seconds since the epoch of the modification time, or 0.
    #[must_use]
    pub fn mtime_secs(&self) -> i64 {
        self.mtime
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_secs()).ok())
            .unwrap_or(0)
    }
}

/// One entry produced by listing a directory, optionally carrying a stat
/// the backend obtained for free while listing.
#[derive(Debug, Clone)]
pub struct DirEntryStat {
    pub name: OsString,
    pub stat: Option<FileInformation>,
}

/// Whether an I/O error means the path (or one of its parents) is gone.
#[must_use]
pub fn is_not_found(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ENOTDIR)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_lstat_file_and_dir() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();

        let file = FileInformation::lstat(&tmp.path().join("a.txt")).unwrap();
        assert!(file.is_file());
        assert_eq!(file.size, 5);

        let dir = FileInformation::lstat(&tmp.path().join("sub")).unwrap();
        assert!(dir.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_lstat_does_not_follow_symlinks() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("target")).unwrap();
        std::os::unix::fs::symlink("target", tmp.path().join("link")).unwrap();

        let link = FileInformation::lstat(&tmp.path().join("link")).unwrap();
        assert!(link.is_symlink());
    }

    #[test]
    fn test_not_found_classification() {
        let tmp = TempDir::new().unwrap();
        let err = FileInformation::lstat(&tmp.path().join("missing")).unwrap_err();
        assert!(is_not_found(&err));

        let other = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(!is_not_found(&other));
    }

    #[cfg(unix)]
    #[test]
    fn test_not_a_directory_is_not_found() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("plain"), "x").unwrap();
        let err = FileInformation::lstat(&tmp.path().join("plain").join("child")).unwrap_err();
        assert!(is_not_found(&err));
    }

    #[test]
    fn test_differs_from_ignores_atime() {
        let base = FileInformation {
            kind: FileKind::File,
            size: 10,
            mtime: Some(SystemTime::UNIX_EPOCH),
            ..Default::default()
        };
        let touched = FileInformation {
            atime: Some(SystemTime::now()),
            ..base.clone()
        };
        assert!(!base.differs_from(&touched));

        let grown = FileInformation {
            size: 11,
            ..base.clone()
        };
        assert!(base.differs_from(&grown));
    }
}
