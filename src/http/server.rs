//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all dispatcher
//! - Wire up middleware (tracing, panic recovery)
//! - Bind server to listener
//! - Dispatch upgrade requests to the WebSocket bridge, everything else to the HTTP relay
//! - Convert any relay failure into a 500 so the listener keeps serving

use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::error::{describe, ProxyError};
use crate::http::request::{is_websocket_upgrade, Disguise};
use crate::http::response::{error_response, PROXY_ERROR_PREFIX, WEBSOCKET_ERROR_PREFIX};
use crate::http::{relay, websocket};
use crate::lifecycle::shutdown;
use crate::observability::metrics;
use crate::upstream::Upstream;

/// Application state injected into handlers.
///
/// Everything here is fixed at startup and only read afterwards.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<Upstream>,
    pub disguise: Arc<Disguise>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(upstream: Upstream) -> Result<Self, ProxyError> {
        let disguise = Disguise::new(&upstream)?;
        Ok(Self {
            upstream: Arc::new(upstream),
            disguise: Arc::new(disguise),
            client: relay::build_client()?,
        })
    }
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let state = AppState::new(Upstream::from(&config.upstream))?;
        let router = Self::build_router(state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProxyError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.host,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Dispatcher: route to the WebSocket bridge or the HTTP relay.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    if is_websocket_upgrade(request.headers()) {
        match websocket::bridge(&state, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(kind = e.kind(), error = %describe(&e), "WebSocket connection error");
                metrics::record_error(e.kind());
                error_response(WEBSOCKET_ERROR_PREFIX, &e)
            }
        }
    } else {
        match relay::forward(&state, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(kind = e.kind(), error = %describe(&e), "Proxy error");
                metrics::record_error(e.kind());
                error_response(PROXY_ERROR_PREFIX, &e)
            }
        }
    }
}

/// Last-resort 500 for a panicking handler.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> axum::http::Response<String> {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    tracing::error!(error = %detail, "Handler panicked");
    metrics::record_error("panic");

    let mut response = axum::http::Response::new(format!("{}: {}", PROXY_ERROR_PREFIX, detail));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
