//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, status
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_rate_limited_total` (counter): denied requests by route
//! - `gateway_rate_limit_store_errors_total` (counter): fail-open decisions
//! - `gateway_auth_failures_total` (counter): rejected credentials by reason
//! - `gateway_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_upstream_errors_total` (counter): transport failures by service, kind

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::resilience::BreakerState;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(route: &str) {
    counter!("gateway_rate_limited_total", "route" => route.to_string()).increment(1);
}

pub fn record_store_error() {
    counter!("gateway_rate_limit_store_errors_total").increment(1);
}

pub fn record_auth_failure(reason: &'static str) {
    counter!("gateway_auth_failures_total", "reason" => reason).increment(1);
}

pub fn record_breaker_state(service: &str, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 1.0,
        BreakerState::Open => 2.0,
    };
    gauge!("gateway_breaker_state", "service" => service.to_string()).set(value);
}

pub fn record_upstream_error(service: &str, kind: &'static str) {
    counter!(
        "gateway_upstream_errors_total",
        "service" => service.to_string(),
        "kind" => kind
    )
    .increment(1);
}
