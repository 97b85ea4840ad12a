//! watchview - live in-memory view of a directory tree
//!
//! Entry point: crawls a root, settles, and prints what the view knows.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use watchview::observability::{init_metrics, init_tracing};
use watchview::{Config, FileResult, InMemoryView, NotifyWatcher, Query, QueryError};

/// watchview - live in-memory view of a directory tree
#[derive(Parser, Debug)]
#[command(name = "watchview")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to watch
    root: std::path::PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "WATCHVIEW_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "WATCHVIEW_LOG_JSON")]
    log_json: bool,

    /// How long to wait for the view to settle after the initial crawl
    #[arg(long, env = "WATCHVIEW_SETTLE_TIMEOUT_MS", default_value = "5000")]
    settle_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);
    init_metrics();

    tracing::info!("watchview v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::load_for_root(&cli.root)
        .with_context(|| format!("loading configuration for {}", cli.root.display()))?;
    tracing::debug!(?config, "Configuration loaded");

    let watcher = Arc::new(NotifyWatcher::new(config.debounce()));
    let view = Arc::new(InMemoryView::new(&cli.root, config, watcher)?);
    view.start_threads()?;

    view.wait_until_ready_to_query().await?;

    let settle_timeout = Duration::from_millis(cli.settle_timeout_ms);
    let settled = {
        let view = Arc::clone(&view);
        tokio::task::spawn_blocking(move || view.sync_to_now(settle_timeout)).await?
    };
    if let Err(e) = settled {
        tracing::warn!(error = %e, "View did not settle, reporting current state");
    }

    let existing = |f: &dyn FileResult| -> Result<bool, QueryError> { Ok(f.exists()) };
    let result = view.run_query(&Query::new(), &existing)?;
    let files: Vec<String> = result
        .paths()
        .iter()
        .map(|p| p.display().to_string())
        .collect();

    let report = serde_json::json!({
        "clock": result.clock_string(),
        "view": view.get_view_debug_info(),
        "watcher": view.get_watcher_debug_info(),
        "files": files,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    view.shutdown();
    Ok(())
}
