//! Response handling and transformation.
//!
//! # Responsibilities
//! - Turn an upstream response into the caller's response
//! - Force `Access-Control-Allow-Origin: *`
//! - Render failures as plain-text 500s
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped; everything else passes through
//! - Every failure maps to 500 with `Proxy Error:` or `WebSocket Error:` prefix

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::error::{describe, ProxyError};
use crate::http::request::strip_hop_by_hop;

/// Prefix for failures on the HTTP relay path.
pub const PROXY_ERROR_PREFIX: &str = "Proxy Error";

/// Prefix for failures on the WebSocket path.
pub const WEBSOCKET_ERROR_PREFIX: &str = "WebSocket Error";

/// Overwrite or add `Access-Control-Allow-Origin: *`.
pub fn allow_any_origin(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}

/// Build the caller's response from the upstream's, streaming the body.
pub fn from_upstream(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);
    allow_any_origin(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// 500 with body `<prefix>: <description>`.
pub fn error_response(prefix: &str, err: &ProxyError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{}: {}", prefix, describe(err)),
    )
        .into_response()
}
