//! Prometheus metrics exposition
//!
//! - `sync_jobs_total` (counter): labels `kind`, `outcome`
//! - `sync_job_duration_seconds` (histogram): label `kind`
//! - `psn_calls_total` (counter): labels `endpoint`, `result`
//! - `psn_call_duration_seconds` (histogram): label `endpoint`
//!
//! Pool-level gauges and counters (`pool_checkout_total`,
//! `pool_quarantine_total`, `dispatch_jobs_total`) are emitted from the
//! library crates and picked up by the same recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Install the Prometheus recorder and return a handle for rendering.
///
/// Explicit buckets make the duration metrics render as histograms (with
/// `_bucket` lines for `histogram_quantile()` queries) instead of the
/// default summary.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("sync_job_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )?
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("psn_call_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )?
        .install_recorder()?;
    Ok(handle)
}

/// Record a completed unit of work.
pub fn record_job(kind: &'static str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!("sync_jobs_total", "kind" => kind, "outcome" => outcome).increment(1);
    metrics::histogram!("sync_job_duration_seconds", "kind" => kind).record(duration_secs);
}

/// Record one external API call.
pub fn record_psn_call(endpoint: &'static str, result: &'static str, duration_secs: f64) {
    metrics::counter!("psn_calls_total", "endpoint" => endpoint, "result" => result).increment(1);
    metrics::histogram!("psn_call_duration_seconds", "endpoint" => endpoint).record(duration_secs);
}
