//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define engine metrics (requests, latency, queue pressure, upstream calls)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `supernode_requests_total` (counter): requests by method, status
//! - `supernode_request_duration_seconds` (histogram): latency distribution
//! - `supernode_queue_rejections_total` (counter): saturated worker queue
//! - `supernode_upstream_calls_total` (counter): forwards by result
//! - `supernode_task_timeouts_total` (counter): expiries by kind (queue, upstream)
//! - `supernode_periodic_ticks_total` (counter): periodic firings
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels are low-cardinality (no paths, no task ids)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// `status` is the numeric code, or "drop" when no response was written.
pub fn record_request(method: &str, status: &str, start: Instant) {
    metrics::counter!(
        "supernode_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("supernode_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_queue_rejection() {
    metrics::counter!("supernode_queue_rejections_total").increment(1);
}

pub fn record_upstream_call(result: &'static str) {
    metrics::counter!("supernode_upstream_calls_total", "result" => result).increment(1);
}

pub fn record_timeout(kind: &'static str) {
    metrics::counter!("supernode_task_timeouts_total", "kind" => kind).increment(1);
}

pub fn record_periodic_tick() {
    metrics::counter!("supernode_periodic_ticks_total").increment(1);
}
