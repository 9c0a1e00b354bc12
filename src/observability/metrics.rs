//! Metrics collection and exposition.
//!
//! # Metrics
//! - `s4_backend_requests_total` (counter): backend attempts by method, outcome
//! - `s4_backend_request_duration_seconds` (histogram): per-attempt latency
//! - `s4_backend_retries_total` (counter): scheduled retries by method
//! - `s4_dispatcher_in_flight` / `s4_dispatcher_queued` (gauges)
//! - `s4_csrf_lookups_total` (counter): cache hit / miss / stale / joined
//! - `s4_csrf_fetches_total` (counter): token fetches by outcome
//! - `s4_proxy_requests_total` (counter): inbound requests by route, status
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;
use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics recorder"),
    }
}

pub fn record_backend_request(method: &str, outcome: &'static str, start: Instant) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("outcome", outcome),
    ];
    metrics::counter!("s4_backend_requests_total", labels.clone()).increment(1);
    metrics::histogram!("s4_backend_request_duration_seconds", labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(method: &str) {
    metrics::counter!("s4_backend_retries_total", "method" => method.to_string()).increment(1);
}

pub fn record_dispatcher_state(in_flight: usize, queued: usize) {
    metrics::gauge!("s4_dispatcher_in_flight").set(in_flight as f64);
    metrics::gauge!("s4_dispatcher_queued").set(queued as f64);
}

pub fn record_csrf_lookup(result: &'static str) {
    metrics::counter!("s4_csrf_lookups_total", "result" => result).increment(1);
}

pub fn record_csrf_fetch(outcome: &'static str) {
    metrics::counter!("s4_csrf_fetches_total", "outcome" => outcome).increment(1);
}

pub fn record_proxy_request(route: &'static str, status: u16) {
    metrics::counter!(
        "s4_proxy_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
}
