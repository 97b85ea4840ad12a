//! Structured logging and metrics.
//!
//! Provides setup for observability using the `tracing` crate with:
//! - Structured logging with JSON output option
//! - Configurable log levels
//! - Spans for the notify and mutator threads
//! - Prometheus counters for the view pipeline

mod metrics;

pub use metrics::{
    init_metrics, CACHE_LOOKUPS, CURRENT_TICK, FILES_AGED_OUT, FILES_TRACKED, PENDING_PROCESSED,
    STAT_ERRORS,
};

use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

/// Initialize tracing with the given configuration.
///
/// Sets up the tracing subscriber with:
/// - Log level from `RUST_LOG`, falling back to `level`
/// - Structured logging output (plain text or JSON)
/// - Thread names, so notify and mutator output can be told apart
///
/// # Panics
///
/// Panics if tracing subscriber has already been initialized in this process.
pub fn init_tracing(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true);

        Registry::default().with(env_filter).with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    }

    tracing::debug!("Tracing initialized: level={}, json={}", level, json);
}

/// Spans shared by the view threads.
pub mod spans {
    use std::path::Path;

    use tracing::{info_span, Span};

    /// Span wrapping the lifetime of one of a root's threads.
    #[must_use]
    pub fn root_thread_span(thread: &str, root: &Path) -> Span {
        info_span!(
            "root_thread",
            thread = %thread,
            root = %root.display(),
        )
    }

    /// Span for a full crawl of a root.
    #[must_use]
    pub fn crawl_span(root: &Path, recrawl_count: u64) -> Span {
        info_span!(
            "full_crawl",
            root = %root.display(),
            recrawl_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_root_thread_span() {
        let span = spans::root_thread_span("io", Path::new("/tmp/root"));
        let _guard = span.enter();
    }

    #[test]
    fn test_crawl_span() {
        let span = spans::crawl_span(Path::new("/tmp/root"), 2);
        let _guard = span.enter();
    }
}
