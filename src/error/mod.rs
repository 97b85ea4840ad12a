//! Error types and Result aliases for watchview.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using watchview's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for watchview operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// In-memory view error.
    #[error("view error: {0}")]
    View(#[from] ViewError),

    /// Watcher backend error.
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors raised while reconciling the view with the filesystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    /// A stat call failed with something other than "not found".
    #[error("failed to stat '{}': errno {errcode:?}", path.display())]
    StatFailure {
        path: PathBuf,
        errcode: Option<i32>,
    },

    /// The watcher lost events; its ordering can no longer be trusted.
    #[error("watcher is desynced, a recrawl is required")]
    Desynced,

    /// The watched root was replaced underneath us.
    #[error("root identity changed from {expected} to {actual}")]
    RootIdentityMismatch { expected: u64, actual: u64 },

    /// Computing a content hash or symlink target failed.
    #[error("failed to derive data for '{}': {reason}", path.display())]
    DerivedData { path: PathBuf, reason: String },

    /// A settle did not round-trip before its deadline.
    #[error("timed out after {timeout:?} waiting for the view to settle")]
    SettleTimeout { timeout: Duration },

    /// The view has not finished its initial crawl.
    #[error("view is not ready to query")]
    NotReady,

    /// The view is shutting down.
    #[error("view was cancelled")]
    Cancelled,
}

/// Watcher backend errors.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to watch path.
    #[error("failed to watch path '{path}': {reason}")]
    WatchFailed { path: String, reason: String },

    /// The backend threads could not be started.
    #[error("failed to start watcher thread: {0}")]
    ThreadSpawn(String),
}

/// Query construction and evaluation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// A glob pattern failed to compile.
    #[error("invalid glob '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    /// A clock string could not be parsed.
    #[error("invalid clock '{0}'")]
    InvalidClock(String),

    /// The caller's predicate failed for one file.
    #[error("predicate failed: {0}")]
    Predicate(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl ViewError {
    /// Create a derived-data error.
    pub fn derived_data(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DerivedData {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
