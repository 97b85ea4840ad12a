//! Content hashes, memoized by path, size and modification time.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use rayon::prelude::*;

use super::derived::{CacheStats, DerivedDataCache};
use crate::error::ViewError;
use crate::watcher::FileInformation;

/// BLAKE3 digest of a file's contents.
pub type ContentHash = blake3::Hash;

/// Identity of one version of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHashCacheKey {
    /// Path relative to the watched root.
    pub relative_path: PathBuf,
    pub file_size: u64,
    pub mtime: Option<SystemTime>,
}

impl ContentHashCacheKey {
    #[must_use]
    pub fn new(relative_path: impl Into<PathBuf>, stat: &FileInformation) -> Self {
        Self {
            relative_path: relative_path.into(),
            file_size: stat.size,
            mtime: stat.mtime,
        }
    }
}

pub struct ContentHashCache {
    root: PathBuf,
    cache: DerivedDataCache<ContentHashCacheKey, ContentHash>,
}

impl ContentHashCache {
    #[must_use]
    pub fn new(root: &Path, max_items: u64, error_ttl: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            cache: DerivedDataCache::new("content_hash", max_items, error_ttl),
        }
    }

    /// Hash of the file identified by `key`, computing it if needed.
    ///
    /// # Errors
    ///
    /// Returns `ViewError::DerivedData` if the file cannot be read or changed
    /// while it was being hashed.
    pub fn get(&self, key: ContentHashCacheKey) -> Result<ContentHash, ViewError> {
        self.cache.get(key, |k| compute_hash(&self.root, k))
    }

    /// Hash a batch of files in parallel so later lookups are hits.
    pub fn prefetch(&self, keys: Vec<ContentHashCacheKey>) {
        if keys.is_empty() {
            return;
        }
        tracing::debug!(count = keys.len(), "Prefetching content hashes");
        keys.into_par_iter().for_each(|key| {
            let _ = self.get(key);
        });
    }

    #[must_use]
    pub fn peek(&self, key: &ContentHashCacheKey) -> Option<Result<ContentHash, ViewError>> {
        self.cache.peek(key)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_stats(&self) {
        self.cache.clear_stats();
    }
}

fn compute_hash(root: &Path, key: &ContentHashCacheKey) -> Result<ContentHash, ViewError> {
    let path = root.join(&key.relative_path);
    let fail = |reason: String| ViewError::derived_data(&path, reason);

    let mut file = File::open(&path).map_err(|e| fail(e.to_string()))?;
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_reader(&mut file)
        .map_err(|e| fail(e.to_string()))?;

    // The key describes the version we were asked about; refuse to pin a
    // hash of some other version to it.
    let after = file
        .metadata()
        .map(|m| FileInformation::from_metadata(&m))
        .map_err(|e| fail(e.to_string()))?;
    if after.size != key.file_size || after.mtime != key.mtime {
        return Err(fail("file changed while it was being hashed".to_string()));
    }

    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key_for(root: &Path, name: &str) -> ContentHashCacheKey {
        let stat = FileInformation::lstat(&root.join(name)).unwrap();
        ContentHashCacheKey::new(name, &stat)
    }

    #[test]
    fn test_hash_matches_blake3() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hello world").unwrap();

        let cache = ContentHashCache::new(tmp.path(), 16, Duration::from_secs(1));
        let hash = cache.get(key_for(tmp.path(), "a.txt")).unwrap();
        assert_eq!(hash, blake3::hash(b"hello world"));
    }

    #[test]
    fn test_unchanged_file_is_not_rehashed() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"data").unwrap();

        let cache = ContentHashCache::new(tmp.path(), 16, Duration::from_secs(1));
        let key = key_for(tmp.path(), "a.txt");
        cache.get(key.clone()).unwrap();
        cache.get(key).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_stale_key_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"short").unwrap();

        let cache = ContentHashCache::new(tmp.path(), 16, Duration::from_secs(1));
        let mut key = key_for(tmp.path(), "a.txt");
        key.file_size += 1;
        let err = cache.get(key).unwrap_err();
        assert!(err.to_string().contains("changed while"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let cache = ContentHashCache::new(tmp.path(), 16, Duration::from_secs(1));
        let key = ContentHashCacheKey {
            relative_path: PathBuf::from("missing"),
            file_size: 0,
            mtime: None,
        };
        assert!(matches!(cache.get(key), Err(ViewError::DerivedData { .. })));
    }

    #[test]
    fn test_prefetch_populates() {
        let tmp = TempDir::new().unwrap();
        let mut keys = Vec::new();
        for i in 0..8 {
            let name = format!("f{i}");
            std::fs::write(tmp.path().join(&name), name.as_bytes()).unwrap();
            keys.push(key_for(tmp.path(), &name));
        }

        let cache = ContentHashCache::new(tmp.path(), 64, Duration::from_secs(1));
        cache.prefetch(keys.clone());
        for key in keys {
            assert!(matches!(cache.peek(&key), Some(Ok(_))));
        }
    }
}
