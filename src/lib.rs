//! Single-upstream reverse proxy for HTTP and WebSocket traffic.
//!
//! Every request is forwarded to one fixed upstream with a browser-like
//! identity (`User-Agent`, `Host`, `Origin`); WebSocket sessions are bridged
//! frame by frame with coupled lifecycles.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use upstream::Upstream;
