//! Per-query execution state fed by the generators.

use std::collections::HashSet;
use std::path::PathBuf;

use super::file_result::FileResult;
use crate::error::QueryError;

/// The caller's file filter.
pub trait Predicate: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the predicate cannot be evaluated for this file;
    /// the error is recorded and the scan continues.
    fn evaluate(&self, file: &dyn FileResult) -> Result<bool, QueryError>;
}

impl<F> Predicate for F
where
    F: Fn(&dyn FileResult) -> Result<bool, QueryError> + Send + Sync,
{
    fn evaluate(&self, file: &dyn FileResult) -> Result<bool, QueryError> {
        self(file)
    }
}

/// Accepts every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAll;

impl Predicate for MatchAll {
    fn evaluate(&self, _file: &dyn FileResult) -> Result<bool, QueryError> {
        Ok(true)
    }
}

/// Collects matches from one or more generators.
pub struct QueryContext<'a> {
    predicate: &'a dyn Predicate,
    limit: Option<usize>,
    results: Vec<Box<dyn FileResult>>,
    seen: HashSet<PathBuf>,
    errors: Vec<QueryError>,
    num_walked: u64,
}

impl<'a> QueryContext<'a> {
    #[must_use]
    pub fn new(predicate: &'a dyn Predicate, limit: Option<usize>) -> Self {
        Self {
            predicate,
            limit,
            results: Vec::new(),
            seen: HashSet::new(),
            errors: Vec::new(),
            num_walked: 0,
        }
    }

    /// Whether the result limit has been reached.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.results.len() >= limit)
    }

    /// Offer one candidate. Returns false once the generator should stop.
    pub fn process(&mut self, file: Box<dyn FileResult>) -> bool {
        if self.is_full() {
            return false;
        }
        self.num_walked += 1;

        if !self.seen.insert(file.relative_path()) {
            return true;
        }

        match self.predicate.evaluate(file.as_ref()) {
            Ok(true) => self.results.push(file),
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(path = %file.relative_path().display(), error = %e, "Predicate failed");
                self.errors.push(e);
            }
        }
        !self.is_full()
    }

    #[must_use]
    pub const fn num_walked(&self) -> u64 {
        self.num_walked
    }

    #[must_use]
    pub fn results(&self) -> &[Box<dyn FileResult>] {
        &self.results
    }

    pub(crate) fn into_parts(self) -> (Vec<Box<dyn FileResult>>, Vec<QueryError>, u64) {
        (self.results, self.errors, self.num_walked)
    }
}
