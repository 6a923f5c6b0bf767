//! Proxy error taxonomy.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised while relaying a request or session.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The upstream target URL could not be built.
    #[error("Invalid upstream target {0}")]
    InvalidTarget(String),

    /// The outbound HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The outbound HTTP request failed (DNS, connect, TLS, transport).
    #[error("{0}")]
    Upstream(#[source] reqwest::Error),

    /// The inbound request could not be upgraded to a WebSocket.
    #[error("{0}")]
    Upgrade(#[source] WebSocketUpgradeRejection),

    /// The upstream WebSocket handshake failed.
    #[error("{0}")]
    Handshake(#[source] tungstenite::Error),

    /// Listener I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidTarget(_) => "invalid_target",
            ProxyError::Client(_) => "client",
            ProxyError::Upstream(_) => "upstream",
            ProxyError::Upgrade(_) => "upgrade",
            ProxyError::Handshake(_) => "handshake",
            ProxyError::Io(_) => "io",
        }
    }
}

/// Render an error followed by its source chain, joined with `": "`.
///
/// Transport errors keep their useful part ("Connection refused") in the
/// sources, so the top-level message alone is not enough for callers.
pub fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Leaf;

    impl fmt::Display for Leaf {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Connection refused")
        }
    }

    impl std::error::Error for Leaf {}

    #[derive(Debug, Error)]
    #[error("error sending request")]
    struct Outer(#[source] Leaf);

    #[test]
    fn describe_walks_sources() {
        assert_eq!(describe(&Outer(Leaf)), "error sending request: Connection refused");
    }

    #[test]
    fn describe_skips_repeated_text() {
        let err = ProxyError::InvalidTarget("https://bad host/".into());
        assert_eq!(describe(&err), "Invalid upstream target https://bad host/");
    }

    #[test]
    fn io_errors_convert() {
        let err: ProxyError = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use").into();
        assert_eq!(err.kind(), "io");
        assert_eq!(err.to_string(), "I/O error: in use");
    }
}
