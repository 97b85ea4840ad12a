//! Query description, execution context and result types.
//!
//! Generators live with the view that owns the data they traverse; this
//! module holds what is independent of any one view implementation:
//! - The `FileResult` capability interface
//! - Predicates and the per-query `QueryContext`
//! - Compiled glob trees

mod context;
mod file_result;
mod glob;

use std::path::PathBuf;

pub use context::{MatchAll, Predicate, QueryContext};
pub use file_result::FileResult;
pub use glob::{DoublestarMatch, GlobNode, GlobTree};

use crate::error::QueryError;
use crate::view::{process_start_time, ClockPosition, ClockSpec};

/// A path generator input: a directory (or file) and how deep to descend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPath {
    /// Relative to the query root.
    pub name: PathBuf,
    /// `None` descends without limit; `Some(0)` yields only direct children.
    pub depth: Option<u32>,
}

impl QueryPath {
    #[must_use]
    pub fn new(name: impl Into<PathBuf>, depth: Option<u32>) -> Self {
        Self {
            name: name.into(),
            depth,
        }
    }
}

/// What to look for and where.
///
/// Exactly one generator runs: `since` selects the time generator, then
/// `paths`, then `globs`; with none of them every file is considered.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub since: Option<ClockSpec>,
    pub paths: Vec<QueryPath>,
    pub globs: Vec<String>,
    pub include_dotfiles: bool,
    /// Overrides the root's configured case sensitivity for globs.
    pub case_sensitive: Option<bool>,
    /// Restrict the query to this subdirectory of the root.
    pub relative_root: Option<PathBuf>,
    pub limit: Option<usize>,
    /// Hash all matches in one batch before returning.
    pub prefetch_content_hashes: bool,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn since(mut self, since: ClockSpec) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: QueryPath) -> Self {
        self.paths.push(path);
        self
    }

    #[must_use]
    pub fn with_glob(mut self, pattern: impl Into<String>) -> Self {
        self.globs.push(pattern.into());
        self
    }

    #[must_use]
    pub fn relative_root(mut self, relative_root: impl Into<PathBuf>) -> Self {
        self.relative_root = Some(relative_root.into());
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Output of a query.
pub struct QueryResult {
    /// View position at which the query ran.
    pub clock: ClockPosition,
    /// The "since" could not be honored incrementally; `files` lists every
    /// existing file instead.
    pub is_fresh_instance: bool,
    pub files: Vec<Box<dyn FileResult>>,
    /// Predicate failures; the files they concern are not in `files`.
    pub errors: Vec<QueryError>,
    pub num_walked: u64,
}

impl QueryResult {
    /// The clock string to pass as `since` next time.
    #[must_use]
    pub fn clock_string(&self) -> String {
        self.clock
            .to_clock_string(process_start_time(), std::process::id())
    }

    /// Relative paths of the matched files.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.relative_path()).collect()
    }
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("clock", &self.clock)
            .field("is_fresh_instance", &self.is_fresh_instance)
            .field("files", &self.paths())
            .field("errors", &self.errors)
            .field("num_walked", &self.num_walked)
            .finish()
    }
}
