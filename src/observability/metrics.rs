//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cache_lookups_total` (counter): lookups by outcome (hit, miss, corrupt, unreadable)
//! - `origin_fetches_total` (counter): origin requests by outcome
//! - `cache_persist_total` (counter): persistence attempts by mode and outcome
//! - `fallback_responses_total` (counter): placeholders served
//! - `proxy_requests_total` (counter): requests by route and status
//! - `proxy_request_duration_seconds` (histogram): time to response headers
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed
//! - Prometheus exporter is opt-in via configuration

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_lookup(outcome: &'static str) {
    counter!("cache_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_origin_fetch(outcome: &'static str) {
    counter!("origin_fetches_total", "outcome" => outcome).increment(1);
}

pub fn record_persist(mode: &'static str, outcome: &'static str) {
    counter!("cache_persist_total", "mode" => mode, "outcome" => outcome).increment(1);
}

pub fn record_fallback() {
    counter!("fallback_responses_total").increment(1);
}

/// Record a finished request (headers sent) for a route.
pub fn record_request(route: &'static str, status: u16, start: Instant) {
    counter!("proxy_requests_total", "route" => route, "status" => status.to_string()).increment(1);
    histogram!("proxy_request_duration_seconds", "route" => route).record(start.elapsed().as_secs_f64());
}
