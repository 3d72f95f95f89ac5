//! Prometheus metrics for request and security-event observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//! Every recording function is fire-and-forget: when no exporter is installed
//! the `metrics` macros are no-ops, so a missing or failed exporter never
//! affects request handling.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `edge_guard_requests_total` - Requests handled (labels: method, status)
//! - `edge_guard_security_events_total` - Security events (label: event)
//!
//! ## Histograms
//! - `edge_guard_request_duration_seconds` - Request duration (labels: method, status)
//!
//! ## Gauges
//! - `edge_guard_rate_limit_windows` - Active rate-limit windows after the last sweep

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "edge_guard_requests_total";
    pub const SECURITY_EVENTS_TOTAL: &str = "edge_guard_security_events_total";
    pub const REQUEST_DURATION_SECONDS: &str = "edge_guard_request_duration_seconds";
    pub const RATE_LIMIT_WINDOWS: &str = "edge_guard_rate_limit_windows";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. port in use,
/// or a recorder is already installed).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::REQUESTS_TOTAL, "Total number of HTTP requests handled");
    describe_counter!(
        names::SECURITY_EVENTS_TOTAL,
        "Security events raised by the request pipeline"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_WINDOWS,
        "Number of live rate-limit windows"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    counter!(names::REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status)
        .record(duration_secs);
}

/// Record a security event by kind.
pub fn record_security_event(event: &'static str) {
    counter!(names::SECURITY_EVENTS_TOTAL, "event" => event).increment(1);
}

/// Update the live rate-limit window gauge.
pub fn set_rate_limit_windows(count: usize) {
    gauge!(names::RATE_LIMIT_WINDOWS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These only verify that recording without an installed exporter is harmless.

    #[test]
    fn test_record_request() {
        record_request("POST", 201, 0.012);
    }

    #[test]
    fn test_record_security_event() {
        record_security_event("csrf_missing");
    }

    #[test]
    fn test_set_rate_limit_windows() {
        set_rate_limit_windows(0);
        set_rate_limit_windows(42);
    }
}
