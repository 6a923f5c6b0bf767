//! Request handling and transformation.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Derive the disguised identity (`User-Agent`, `Host`, `Origin`)
//! - Produce the outbound header set for HTTP and WebSocket handshakes
//! - Strip hop-by-hop headers at the transport boundary
//!
//! # Design Decisions
//! - Every inbound header is copied forward; only the three identity headers are overridden
//! - Overridden headers keep the position of the inbound entry they replace
//! - The transform is total: any inbound header set, including an empty one, is accepted

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::error::ProxyError;
use crate::upstream::Upstream;

/// `User-Agent` presented for desktop callers.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// `User-Agent` presented for callers that send `sec-ch-ua-mobile: ?1`.
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36";

/// Client hint carrying the caller's device class.
pub const MOBILE_HINT: &str = "sec-ch-ua-mobile";

/// Headers that describe a single hop and never cross the proxy.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Headers the WebSocket client generates for its own handshake.
const HANDSHAKE_OWNED: [HeaderName; 5] = [
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::SEC_WEBSOCKET_ACCEPT,
    header::CONTENT_LENGTH,
];

/// True when the `Upgrade` header equals `websocket`, ignoring case.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// True when the caller declared itself mobile with exactly `sec-ch-ua-mobile: ?1`.
///
/// Absent, repeated, or any other value means desktop.
pub fn is_mobile(headers: &HeaderMap) -> bool {
    let mut values = headers.get_all(MOBILE_HINT).iter();
    matches!(
        (values.next(), values.next()),
        (Some(value), None) if value.as_bytes() == b"?1"
    )
}

/// Pick the browser string matching the caller's device class.
pub fn user_agent_for(mobile: bool) -> &'static str {
    if mobile {
        MOBILE_USER_AGENT
    } else {
        DESKTOP_USER_AGENT
    }
}

/// The identity headers presented to the upstream.
///
/// Built once at startup so that applying it per request cannot fail.
#[derive(Debug, Clone)]
pub struct Disguise {
    host: HeaderValue,
    origin: HeaderValue,
}

impl Disguise {
    pub fn new(upstream: &Upstream) -> Result<Self, ProxyError> {
        let host = HeaderValue::from_str(upstream.host())
            .map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", upstream.host(), e)))?;
        let origin = HeaderValue::from_str(&upstream.origin())
            .map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", upstream.origin(), e)))?;
        Ok(Self { host, origin })
    }

    /// Outbound header set for a plain HTTP request.
    pub fn transform(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = inbound.clone();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(user_agent_for(is_mobile(inbound))),
        );
        headers.insert(header::HOST, self.host.clone());
        headers.insert(header::ORIGIN, self.origin.clone());
        headers
    }

    /// Outbound header set for the upstream WebSocket handshake.
    ///
    /// Same as [`Disguise::transform`] minus hop-by-hop headers and the
    /// handshake headers the WebSocket client writes itself.
    pub fn handshake(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = self.transform(inbound);
        strip_hop_by_hop(&mut headers);
        for name in HANDSHAKE_OWNED.iter() {
            headers.remove(name);
        }
        headers
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
