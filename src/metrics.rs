// src/metrics.rs
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration so series carry descriptions wherever the
/// embedding process exports them.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sitewatch_runs_total", "Pipeline runs started.");
        describe_counter!(
            "sitewatch_run_failures_total",
            "Runs that exhausted retries or hit a defect."
        );
        describe_counter!(
            "sitewatch_fetch_errors_total",
            "Individual fetch attempt failures."
        );
        describe_counter!("sitewatch_changes_total", "Change records written.");
        describe_counter!(
            "sitewatch_alerts_total",
            "Changes that met a target's alert threshold."
        );
        describe_counter!(
            "sitewatch_score_fallback_total",
            "Scores produced by the rule-based fallback path."
        );
        describe_counter!(
            "sitewatch_dispatch_total",
            "Targets dispatched by the scheduler."
        );
        describe_gauge!("sitewatch_last_tick_ts", "Unix ts of the last scheduler tick.");
        describe_histogram!("sitewatch_fetch_ms", "Page fetch time in milliseconds.");
    });
}
