//! Memoization of expensive per-file derived data.
//!
//! Caches are keyed by a file's identity (root-relative path plus the parts
//! of its stat that change when the content does), so an unchanged file is
//! never recomputed. Failures are cached too, but only for a short TTL.

mod content_hash;
mod derived;
mod symlink;

use std::path::Path;
use std::time::Duration;

pub use content_hash::{ContentHash, ContentHashCache, ContentHashCacheKey};
pub use derived::{CacheStats, DerivedDataCache};
pub use symlink::{SymlinkTargetCache, SymlinkTargetCacheKey};

/// The caches owned by one in-memory view.
pub struct InMemoryViewCaches {
    pub content_hash: ContentHashCache,
    pub symlink_target: SymlinkTargetCache,
}

impl InMemoryViewCaches {
    #[must_use]
    pub fn new(root: &Path, max_hashes: u64, max_symlinks: u64, error_ttl: Duration) -> Self {
        Self {
            content_hash: ContentHashCache::new(root, max_hashes, error_ttl),
            symlink_target: SymlinkTargetCache::new(root, max_symlinks, error_ttl),
        }
    }

    /// Statistics for every cache.
    #[must_use]
    pub fn stats(&self) -> Vec<CacheStats> {
        vec![self.content_hash.stats(), self.symlink_target.stats()]
    }

    /// Reset hit/miss counters.
    pub fn clear_stats(&self) {
        self.content_hash.clear_stats();
        self.symlink_target.clear_stats();
    }
}
