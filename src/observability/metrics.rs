//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): relayed HTTP requests by method, status
//! - `proxy_request_duration_seconds` (histogram): time to upstream response headers
//! - `proxy_upstream_errors_total` (counter): failures by error kind
//! - `proxy_websocket_sessions_active` (gauge): sessions with a live handle
//! - `proxy_websocket_messages_total` (counter): relayed frames by direction
//! - `proxy_websocket_messages_dropped_total` (counter): frames dropped on a non-open handle

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one relayed HTTP request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record a failure that ended a request or session.
pub fn record_error(kind: &'static str) {
    counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn session_opened() {
    gauge!("proxy_websocket_sessions_active").increment(1.0);
}

pub fn session_closed() {
    gauge!("proxy_websocket_sessions_active").decrement(1.0);
}

/// Record one frame relayed in `direction` (`client_to_upstream` / `upstream_to_client`).
pub fn record_message(direction: &'static str) {
    counter!("proxy_websocket_messages_total", "direction" => direction).increment(1);
}

pub fn record_dropped_message(direction: &'static str) {
    counter!("proxy_websocket_messages_dropped_total", "direction" => direction).increment(1);
}
