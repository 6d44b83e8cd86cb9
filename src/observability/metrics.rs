//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gatehouse_requests_total` (counter): completed requests by method, status
//! - `gatehouse_request_duration_seconds` (histogram): latency distribution
//! - `gatehouse_rate_limited_total` (counter): admission rejections
//! - `gatehouse_policy_rejections_total` (counter): origin/auth rejections by reason
//! - `gatehouse_panics_recovered_total` (counter): recovered faults by kind
//! - `gatehouse_cache_close_total` (counter): cache client teardown by outcome
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, latency: Duration) {
    counter!(
        "gatehouse_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gatehouse_request_duration_seconds").record(latency.as_secs_f64());
}

pub fn record_rate_limited() {
    counter!("gatehouse_rate_limited_total").increment(1);
}

pub fn record_policy_rejection(reason: &'static str) {
    counter!("gatehouse_policy_rejections_total", "reason" => reason).increment(1);
}

pub fn record_panic(kind: &'static str) {
    counter!("gatehouse_panics_recovered_total", "kind" => kind).increment(1);
}

pub fn record_cache_close(outcome: &'static str) {
    counter!("gatehouse_cache_close_total", "outcome" => outcome).increment(1);
}
