//! The single fixed upstream every request is forwarded to.
//!
//! # Responsibilities
//! - Hold the upstream authority (host with optional port)
//! - Build `https://` and `wss://` targets from an inbound URI
//! - Provide the disguised `Host` and `Origin` values
//!
//! # Design Decisions
//! - Path and query are appended verbatim; the inbound URI is never re-encoded here
//! - `secure = false` swaps in `http`/`ws`, which only local test upstreams need

use axum::http::Uri;
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::ProxyError;

/// Default upstream host.
pub const DEFAULT_UPSTREAM_HOST: &str = "open-webui-open-webui.hf.space";

/// Immutable description of the upstream, shared by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    host: String,
    secure: bool,
}

impl Upstream {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            secure,
        }
    }

    /// The authority sent in the `Host` header.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    fn http_scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }

    fn ws_scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }

    /// Value of the `Origin` header presented to the upstream.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.http_scheme(), self.host)
    }

    /// Target for a plain HTTP request: `https://<host><path>[?query]`.
    pub fn http_url(&self, uri: &Uri) -> Result<Url, ProxyError> {
        self.target(self.http_scheme(), uri)
    }

    /// Target for a WebSocket session: `wss://<host><path>[?query]`.
    pub fn websocket_url(&self, uri: &Uri) -> Result<Url, ProxyError> {
        self.target(self.ws_scheme(), uri)
    }

    fn target(&self, scheme: &str, uri: &Uri) -> Result<Url, ProxyError> {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let raw = format!("{}://{}{}", scheme, self.host, path_and_query);
        Url::parse(&raw).map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", raw, e)))
    }
}

impl From<&UpstreamConfig> for Upstream {
    fn from(config: &UpstreamConfig) -> Self {
        Self::new(config.host.clone(), config.secure)
    }
}

impl Default for Upstream {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_HOST, true)
    }
}
