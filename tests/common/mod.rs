//! Shared utilities for integration tests: a mock upstream and a proxy in front of it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

use space_proxy::config::ProxyConfig;
use space_proxy::{HttpServer, Shutdown};

/// What the mock upstream saw for one plain HTTP request.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Events from the mock upstream's WebSocket endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    Connected(HeaderMap),
    Received(String),
    Ended,
}

#[derive(Clone)]
struct Probe {
    requests: mpsc::UnboundedSender<Recorded>,
    ws_events: mpsc::UnboundedSender<WsEvent>,
}

/// Handle on a running mock upstream.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub requests: Mutex<mpsc::UnboundedReceiver<Recorded>>,
    pub ws_events: Mutex<mpsc::UnboundedReceiver<WsEvent>>,
}

impl MockUpstream {
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub async fn next_request(&self) -> Recorded {
        let mut rx = self.requests.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("upstream saw no request")
            .expect("upstream stopped")
    }

    pub async fn next_ws_event(&self) -> WsEvent {
        let mut rx = self.ws_events.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("upstream saw no websocket event")
            .expect("upstream stopped")
    }
}

/// Start a mock upstream on an ephemeral port.
///
/// Routes:
/// - `/redirect` answers 302 to `/landing`
/// - `/status/404` answers 404
/// - `/ws` accepts WebSockets: `ping` → `pong`, `bye` → server closes,
///   anything else is echoed
/// - everything else answers 200 with `upstream ok`
pub async fn start_mock_upstream() -> MockUpstream {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (ws_tx, ws_rx) = mpsc::unbounded_channel();
    let probe = Probe {
        requests: requests_tx,
        ws_events: ws_tx,
    };

    let app = Router::new()
        .route("/ws", get(ws_endpoint))
        .route("/redirect", any(redirect))
        .route("/status/404", any(not_found))
        .fallback(record)
        .with_state(Arc::new(probe));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockUpstream {
        addr,
        requests: Mutex::new(requests_rx),
        ws_events: Mutex::new(ws_rx),
    }
}

async fn record(State(probe): State<Arc<Probe>>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, 16 * 1024 * 1024).await.unwrap_or_default();
    let _ = probe.requests.send(Recorded {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body: body.to_vec(),
    });

    (
        StatusCode::OK,
        [
            ("x-upstream", "yes"),
            ("access-control-allow-origin", "https://somewhere.else"),
        ],
        "upstream ok",
    )
        .into_response()
}

async fn redirect() -> Response {
    (StatusCode::FOUND, [("location", "/landing")]).into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "missing").into_response()
}

async fn ws_endpoint(
    State(probe): State<Arc<Probe>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let _ = probe.ws_events.send(WsEvent::Connected(headers));
    ws.on_upgrade(move |socket| echo(socket, probe))
}

async fn echo(mut socket: WebSocket, probe: Arc<Probe>) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                let text = text.as_str().to_owned();
                let _ = probe.ws_events.send(WsEvent::Received(text.clone()));
                let reply = match text.as_str() {
                    "ping" => "pong".to_string(),
                    "bye" => {
                        let _ = socket.send(Message::Close(None)).await;
                        continue;
                    }
                    other => other.to_string(),
                };
                if socket.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
            }
            Message::Binary(data) => {
                if socket.send(Message::Binary(data)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    let _ = probe.ws_events.send(WsEvent::Ended);
}

/// Start the proxy in front of `upstream_host` (plain `http`/`ws`).
pub async fn start_proxy(upstream_host: String) -> (SocketAddr, Shutdown) {
    let mut config = ProxyConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.upstream.host = upstream_host;
    config.upstream.secure = false;

    let listener = TcpListener::bind(config.listener.bind_address()).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config).unwrap();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// HTTP client that never reuses connections or follows redirects itself.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}
