//! Configuration settings and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Name of the optional per-root configuration file.
pub const CONFIG_FILE_NAME: &str = ".watchviewconfig";

/// Tuning knobs for one watched root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long the pending queue must stay idle before the view is settled.
    pub settle_ms: u64,

    /// Upper bound on how long the notify thread blocks before re-checking
    /// for shutdown.
    pub notify_poll_ms: u64,

    /// Debounce window handed to the notify backend.
    pub debounce_ms: u64,

    /// Maximum number of memoized content hashes.
    pub content_hash_max_items: u64,

    /// Maximum number of memoized symlink targets.
    pub symlink_cache_max_items: u64,

    /// How long a failed hash or readlink stays cached.
    pub content_hash_negative_cache_ttl_ms: u64,

    /// Minimum age of a tombstoned entry before it is aged out.
    pub gc_age_seconds: u64,

    /// Minimum interval between automatic age-out sweeps.
    pub gc_interval_seconds: u64,

    /// Hash recently changed files when the view settles.
    pub enable_content_cache_warming: bool,

    /// How many recently changed files to warm per settle.
    pub content_cache_warming_max_files: usize,

    /// Block the settle until warming completes.
    pub sync_content_cache_warming: bool,

    /// Re-queue a file's parent directory whenever the file changes.
    pub propagate_to_parent_dirs: bool,

    /// Root-relative directories that are never tracked.
    pub ignore_dirs: Vec<PathBuf>,

    /// Root-relative VCS directories whose subdirectories are not crawled.
    pub ignore_vcs: Vec<PathBuf>,

    /// Whether glob matching is case sensitive.
    pub case_sensitive: bool,

    /// Capacity of the processed-change ring buffer; 0 disables it.
    pub pending_log_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settle_ms: 20,
            notify_poll_ms: 250,
            debounce_ms: 50,
            content_hash_max_items: 131_072,
            symlink_cache_max_items: 32_768,
            content_hash_negative_cache_ttl_ms: 2000,
            gc_age_seconds: 172_800,
            gc_interval_seconds: 86_400,
            enable_content_cache_warming: false,
            content_cache_warming_max_files: 1024,
            sync_content_cache_warming: false,
            propagate_to_parent_dirs: false,
            ignore_dirs: Vec::new(),
            ignore_vcs: vec![
                PathBuf::from(".git"),
                PathBuf::from(".hg"),
                PathBuf::from(".svn"),
            ],
            case_sensitive: !cfg!(any(target_os = "macos", windows)),
            pending_log_size: 0,
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the configuration for a watched root.
    ///
    /// Reads `.watchviewconfig` (JSON) from the root when present, falling
    /// back to defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load_for_root(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        let config = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<Self>(&raw).map_err(|e| {
                Error::config(format!("failed to parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        tracing::debug!(path = %path.display(), ?config, "Loaded root configuration");
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.settle_ms == 0 {
            return Err(Error::config("settle_ms cannot be 0"));
        }

        if self.notify_poll_ms == 0 {
            return Err(Error::config("notify_poll_ms cannot be 0"));
        }

        if self.content_hash_max_items == 0 {
            return Err(Error::config("content_hash_max_items cannot be 0"));
        }

        if self.symlink_cache_max_items == 0 {
            return Err(Error::config("symlink_cache_max_items cannot be 0"));
        }

        if self.enable_content_cache_warming && self.content_cache_warming_max_files == 0 {
            return Err(Error::config(
                "content_cache_warming_max_files cannot be 0 when warming is enabled",
            ));
        }

        for dir in self.ignore_dirs.iter().chain(&self.ignore_vcs) {
            if dir.is_absolute() {
                return Err(Error::config(format!(
                    "ignore path '{}' must be relative to the root",
                    dir.display()
                )));
            }
        }

        Ok(())
    }

    /// Settle interval as a `Duration`.
    #[must_use]
    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Notify poll interval as a `Duration`.
    #[must_use]
    pub const fn notify_poll(&self) -> Duration {
        Duration::from_millis(self.notify_poll_ms)
    }

    /// Debounce window as a `Duration`.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Negative cache TTL as a `Duration`.
    #[must_use]
    pub const fn error_ttl(&self) -> Duration {
        Duration::from_millis(self.content_hash_negative_cache_ttl_ms)
    }

    /// Age-out threshold as a `Duration`.
    #[must_use]
    pub const fn gc_age(&self) -> Duration {
        Duration::from_secs(self.gc_age_seconds)
    }

    /// Age-out interval as a `Duration`.
    #[must_use]
    pub const fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.settle_ms, 20);
        assert_eq!(config.content_hash_max_items, 131_072);
        assert_eq!(config.ignore_vcs.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_new() {
        let config = Config::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_settle() {
        let config = Config {
            settle_ms: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("settle_ms"));
    }

    #[test]
    fn test_validate_zero_hash_cache() {
        let config = Config {
            content_hash_max_items: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("content_hash_max_items"));
    }

    #[test]
    fn test_validate_warming_without_budget() {
        let config = Config {
            enable_content_cache_warming: true,
            content_cache_warming_max_files: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_absolute_ignore_dir() {
        let config = Config {
            ignore_dirs: vec![PathBuf::from("/abs/path")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("relative"));
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config {
            settle_ms: 35,
            gc_age_seconds: 60,
            ..Default::default()
        };
        assert_eq!(config.settle(), Duration::from_millis(35));
        assert_eq!(config.gc_age(), Duration::from_secs(60));
        assert_eq!(config.error_ttl(), Duration::from_millis(2000));
    }

    #[test]
    fn test_load_for_root_without_file() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load_for_root(tmp.path()).unwrap();
        assert_eq!(config.settle_ms, Config::default().settle_ms);
    }

    #[test]
    fn test_load_for_root_partial_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"{"settle_ms": 75, "ignore_dirs": ["build"]}"#,
        )
        .unwrap();

        let config = Config::load_for_root(tmp.path()).unwrap();
        assert_eq!(config.settle_ms, 75);
        assert_eq!(config.ignore_dirs, vec![PathBuf::from("build")]);
        assert_eq!(config.gc_age_seconds, 172_800);
    }

    #[test]
    fn test_load_for_root_invalid_json() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), "{not json").unwrap();

        let err = Config::load_for_root(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_load_for_root_rejects_invalid_values() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), r#"{"settle_ms": 0}"#).unwrap();

        assert!(Config::load_for_root(tmp.path()).is_err());
    }
}
