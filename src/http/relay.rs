//! HTTP relay.
//!
//! # Responsibilities
//! - Rewrite the target to `https://<upstream><path>[?query]`
//! - Apply the disguise to the outbound headers
//! - Stream the request body up and the response body down
//!
//! # Design Decisions
//! - Exactly one outbound request per inbound request; no retries
//! - Redirects are followed by the client, not surfaced to the caller
//! - Bodies are never buffered

use std::time::{Duration, Instant};

use axum::{
    body::{Body, HttpBody},
    http::Request,
    response::Response,
};
use reqwest::redirect::Policy;

use crate::error::ProxyError;
use crate::http::request::strip_hop_by_hop;
use crate::http::response;
use crate::http::server::AppState;
use crate::observability::metrics;

/// Maximum redirect hops followed for one request.
pub const MAX_REDIRECTS: usize = 10;

/// Build the outbound HTTP client.
///
/// Idle pooled connections are dropped quickly: nothing is retained between
/// requests beyond what the transport needs.
pub fn build_client() -> Result<reqwest::Client, ProxyError> {
    reqwest::Client::builder()
        .redirect(Policy::limited(MAX_REDIRECTS))
        .pool_idle_timeout(Duration::from_secs(30))
        .no_proxy()
        .build()
        .map_err(ProxyError::Client)
}

/// Forward one non-upgrade request to the upstream.
pub async fn forward(state: &AppState, request: Request<Body>) -> Result<Response, ProxyError> {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let target = state.upstream.http_url(&parts.uri)?;

    tracing::info!(method = %parts.method, target = %target, "Proxying HTTP request");

    let mut headers = state.disguise.transform(&parts.headers);
    strip_hop_by_hop(&mut headers);

    let mut outbound = state
        .client
        .request(parts.method.clone(), target)
        .headers(headers);
    if !body.is_end_stream() {
        outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = outbound.send().await.map_err(ProxyError::Upstream)?;

    tracing::debug!(
        method = %parts.method,
        status = %upstream.status(),
        final_url = %upstream.url(),
        "Upstream responded"
    );
    metrics::record_request(parts.method.as_str(), upstream.status().as_u16(), start);

    Ok(response::from_upstream(upstream))
}
