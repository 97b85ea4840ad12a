//! Prometheus metrics definitions.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Files currently held in views, tombstones included.
pub static FILES_TRACKED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "watchview_files_tracked",
        "Number of tracked files, including tombstoned entries"
    )
    .expect("register watchview_files_tracked")
});

/// Most recently published tick.
pub static CURRENT_TICK: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("watchview_current_tick", "Most recently published view tick")
        .expect("register watchview_current_tick")
});

/// Pending changes applied by mutator passes.
pub static PENDING_PROCESSED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "watchview_pending_processed_total",
        "Number of pending changes applied to the view"
    )
    .expect("register watchview_pending_processed_total")
});

/// Stat calls that failed with something other than "not found".
pub static STAT_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "watchview_stat_errors_total",
        "Number of stat failures treated as tentative deletions"
    )
    .expect("register watchview_stat_errors_total")
});

/// Tombstoned files evicted by age-out.
pub static FILES_AGED_OUT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "watchview_files_aged_out_total",
        "Number of tombstoned files evicted by age-out"
    )
    .expect("register watchview_files_aged_out_total")
});

/// Derived-data cache lookups by cache and outcome.
pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "watchview_cache_lookups_total",
        "Derived-data cache lookups",
        &["cache", "outcome"]
    )
    .expect("register watchview_cache_lookups_total")
});

/// Initialize all metrics (call once at startup).
pub fn init_metrics() {
    // Access lazy statics to register them
    let _ = &*FILES_TRACKED;
    let _ = &*CURRENT_TICK;
    let _ = &*PENDING_PROCESSED;
    let _ = &*STAT_ERRORS;
    let _ = &*FILES_AGED_OUT;
    let _ = &*CACHE_LOOKUPS;

    tracing::debug!("Prometheus metrics initialized");
}
