//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, status
//! - `http_request_duration_seconds` (histogram): handler latency
//! - `rate_limited_total` (counter): admission denials by scope
//! - `relay_requests_total` (counter): relay outcomes (success, busy, timeout, failure)
//! - `relay_probe_duration_seconds` (histogram): time to first processor message
//! - `relay_chunks_total` / `relay_bytes_total` (counters): data pulled from the processor
//! - `relay_inflight_calls` (gauge): open processor calls
//!
//! # Design Decisions
//! - Recording is always on; without an installed exporter the macros are no-ops
//! - Prometheus exporter runs on its own listener, separate from the API

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("http_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_relay_outcome(outcome: &'static str) {
    counter!("relay_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_probe_duration(elapsed: Duration) {
    histogram!("relay_probe_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_chunk(len: usize) {
    counter!("relay_chunks_total").increment(1);
    counter!("relay_bytes_total").increment(len as u64);
}

pub fn record_inflight_calls(active: u64) {
    gauge!("relay_inflight_calls").set(active as f64);
}
