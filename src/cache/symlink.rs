//! Symlink targets, memoized by path and modification time.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::derived::{CacheStats, DerivedDataCache};
use crate::error::ViewError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymlinkTargetCacheKey {
    /// Path relative to the watched root.
    pub relative_path: PathBuf,
    pub mtime: Option<SystemTime>,
}

pub struct SymlinkTargetCache {
    root: PathBuf,
    cache: DerivedDataCache<SymlinkTargetCacheKey, PathBuf>,
}

impl SymlinkTargetCache {
    #[must_use]
    pub fn new(root: &Path, max_items: u64, error_ttl: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            cache: DerivedDataCache::new("symlink_target", max_items, error_ttl),
        }
    }

    /// Target of the symlink identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns `ViewError::DerivedData` if the link cannot be read.
    pub fn get(&self, key: SymlinkTargetCacheKey) -> Result<PathBuf, ViewError> {
        self.cache.get(key, |k| {
            let path = self.root.join(&k.relative_path);
            std::fs::read_link(&path).map_err(|e| ViewError::derived_data(&path, e.to_string()))
        })
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_stats(&self) {
        self.cache.clear_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_reads_link_target() {
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink("some/target", tmp.path().join("link")).unwrap();

        let cache = SymlinkTargetCache::new(tmp.path(), 16, Duration::from_secs(1));
        let key = SymlinkTargetCacheKey {
            relative_path: PathBuf::from("link"),
            mtime: None,
        };
        assert_eq!(cache.get(key.clone()).unwrap(), PathBuf::from("some/target"));
        assert_eq!(cache.get(key).unwrap(), PathBuf::from("some/target"));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_regular_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("plain"), b"x").unwrap();

        let cache = SymlinkTargetCache::new(tmp.path(), 16, Duration::from_secs(1));
        let key = SymlinkTargetCacheKey {
            relative_path: PathBuf::from("plain"),
            mtime: None,
        };
        assert!(cache.get(key).is_err());
    }
}
