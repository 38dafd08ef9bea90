//! Prometheus metrics endpoint
//!
//! Exposes gateway metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    let _ = &*PROMETHEUS_HANDLE;
    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "courier_requests_total",
        "Total number of gateway calls by provider and status"
    );
    metrics::describe_histogram!(
        "courier_request_duration_seconds",
        "Time until response headers were ready, in seconds"
    );
    metrics::describe_counter!(
        "courier_upstream_timeouts_total",
        "Upstream calls aborted by the deadline"
    );
    metrics::describe_counter!(
        "courier_stream_chunks_total",
        "Chunks relayed in streaming mode"
    );
    metrics::describe_counter!(
        "courier_transform_fallbacks_total",
        "Responses returned untransformed because a transform failed"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record a finished gateway call
pub fn record_request(provider: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "courier_requests_total",
        "provider" => provider,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("courier_request_duration_seconds", "provider" => provider)
        .record(duration_secs);
}

/// Record an upstream call aborted by its deadline
pub fn record_upstream_timeout(provider: &'static str) {
    metrics::counter!("courier_upstream_timeouts_total", "provider" => provider).increment(1);
}
