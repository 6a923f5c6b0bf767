//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Complete upgrade handshake with client
//! - Establish WebSocket connection to the upstream
//! - Bidirectional frame forwarding
//! - Couple the two connection lifecycles
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - The upstream handshake completes before the client upgrade is answered, so a
//!   failed upstream becomes a 500 instead of a half-open session
//! - One pump per direction; each owns the source stream and the peer's sink
//! - Fire-and-forget: a frame for a handle that is not `Open` is dropped, never
//!   queued. A frame racing a close may be lost.
//! - Close and error on one handle close the other, only if it was still `Open`
//! - The first pump to finish raises a session-wide close signal; the other pump
//!   flushes its peer's close and stops reading after [`CLOSE_GRACE`]
//! - Ping/pong stay per hop; text and binary frames are relayed unmodified

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{self, WebSocket, WebSocketUpgrade},
        FromRequestParts,
    },
    http::{header, Request},
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, client::IntoClientRequest, protocol::frame::coding::CloseCode},
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;

use crate::error::ProxyError;
use crate::http::server::AppState;
use crate::observability::metrics;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a handle may keep reading after its peer closed, so a close
/// handshake in flight can finish.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Unique identifier for a WebSocket session, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which endpoint of a session a handle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Upstream => "upstream",
        }
    }

    pub fn peer(&self) -> Side {
        match self {
            Side::Client => Side::Upstream,
            Side::Upstream => Side::Client,
        }
    }

    /// Metrics label for frames read from this side.
    fn direction(&self) -> &'static str {
        match self {
            Side::Client => "client_to_upstream",
            Side::Upstream => "upstream_to_client",
        }
    }
}

/// Lifecycle of one connection handle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for HandleState {
    fn from(val: u8) -> Self {
        match val {
            0 => HandleState::Connecting,
            1 => HandleState::Open,
            2 => HandleState::Closing,
            _ => HandleState::Closed,
        }
    }
}

/// State of one endpoint, shared by both pumps.
#[derive(Debug)]
pub struct Handle {
    side: Side,
    state: AtomicU8,
}

impl Handle {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            state: AtomicU8::new(HandleState::Connecting as u8),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> HandleState {
        self.state.load(Ordering::Acquire).into()
    }

    pub fn is_open(&self) -> bool {
        self.state() == HandleState::Open
    }

    /// `Connecting → Open`. Returns false if the handle already moved on.
    pub fn open(&self) -> bool {
        self.transition(HandleState::Connecting, HandleState::Open)
    }

    /// `Open → Closing`. Returns true if this call started the close.
    pub fn begin_close(&self) -> bool {
        self.transition(HandleState::Open, HandleState::Closing)
    }

    /// Move to `Closed` from any state, returning the state it was in.
    pub fn mark_closed(&self) -> HandleState {
        self.state
            .swap(HandleState::Closed as u8, Ordering::AcqRel)
            .into()
    }

    fn transition(&self, from: HandleState, to: HandleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A client/upstream pair.
///
/// `Active` while either handle is not `Closed`, terminated once both are.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    client: Handle,
    upstream: Handle,
    /// Raised once either pump has finished.
    closed: watch::Sender<bool>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            client: Handle::new(Side::Client),
            upstream: Handle::new(Side::Upstream),
            closed: watch::channel(false).0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn client(&self) -> &Handle {
        &self.client
    }

    pub fn upstream(&self) -> &Handle {
        &self.upstream
    }

    pub fn handle(&self, side: Side) -> &Handle {
        match side {
            Side::Client => &self.client,
            Side::Upstream => &self.upstream,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.client.state() == HandleState::Closed && self.upstream.state() == HandleState::Closed
    }

    /// Relay frames until both handles are closed.
    pub async fn run<C, U>(self, client: C, upstream: U)
    where
        C: Stream<Item = Result<ws::Message, axum::Error>>
            + Sink<ws::Message, Error = axum::Error>
            + Unpin,
        U: Stream<Item = Result<tungstenite::Message, tungstenite::Error>>
            + Sink<tungstenite::Message, Error = tungstenite::Error>
            + Unpin,
    {
        metrics::session_opened();
        tracing::debug!(session = %self.id, "WebSocket session active");

        let (client_tx, client_rx) = client.split();
        let (upstream_tx, upstream_rx) = upstream.split();

        // Subscribe before either pump can raise the signal.
        let client_watch = self.closed.subscribe();
        let upstream_watch = self.closed.subscribe();

        tokio::join!(
            self.pump(Side::Client, client_rx, upstream_tx, client_watch),
            self.pump(Side::Upstream, upstream_rx, client_tx, upstream_watch),
        );

        metrics::session_closed();
        tracing::info!(session = %self.id, "WebSocket session closed");
    }

    /// Read frames from the `from` side and forward them into `sink` until
    /// that side ends, or until [`CLOSE_GRACE`] after the other pump finished.
    ///
    /// When `from` ends while it was `Open`, the peer is closed through `sink`.
    async fn pump<S, K, M, E>(
        &self,
        from: Side,
        mut source: S,
        mut sink: K,
        mut peer_done: watch::Receiver<bool>,
    ) where
        S: Stream<Item = Result<M, E>> + Unpin,
        E: fmt::Display,
        M: Frame,
        K: Sink<M::Peer> + Unpin,
        K::Error: fmt::Display,
    {
        let id = self.id;
        let direction = from.direction();
        let (source_handle, to) = (self.handle(from), self.handle(from.peer()));

        let linger = tokio::time::sleep(CLOSE_GRACE);
        tokio::pin!(linger);
        let mut lingering = false;

        let ending = loop {
            tokio::select! {
                next = source.next() => match next {
                    Some(Ok(frame)) => match frame.relay() {
                        Relayed::Data(out) => {
                            // Check-then-send; a close landing in between loses this frame.
                            if !to.is_open() {
                                tracing::debug!(session = %id, direction, state = ?to.state(), "Dropping frame for non-open handle");
                                metrics::record_dropped_message(direction);
                                continue;
                            }
                            match sink.send(out).await {
                                Ok(()) => metrics::record_message(direction),
                                Err(e) => {
                                    tracing::debug!(session = %id, side = to.side().as_str(), error = %e, "Send failed");
                                }
                            }
                        }
                        Relayed::Close => break Ending::Closed,
                        Relayed::Control => {}
                    },
                    Some(Err(e)) => {
                        tracing::warn!(session = %id, side = from.as_str(), error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break Ending::Errored;
                    }
                    None => break Ending::Closed,
                },
                changed = peer_done.changed(), if !lingering => {
                    lingering = true;
                    if changed.is_ok() {
                        // The peer already went away; flush its pending close reply.
                        let _ = sink.close().await;
                    }
                    linger.as_mut().reset(tokio::time::Instant::now() + CLOSE_GRACE);
                }
                () = &mut linger, if lingering => break Ending::Abandoned,
            }
        };

        let previous = source_handle.mark_closed();
        tracing::debug!(session = %id, side = from.as_str(), ?previous, ?ending, "Handle closed");

        if previous == HandleState::Open && to.begin_close() {
            tracing::debug!(session = %id, side = to.side().as_str(), "Closing peer");
            if ending == Ending::Errored {
                let reason = format!("{} connection failed", from.as_str());
                let _ = sink.send(<M::Peer as Frame>::error_close(&reason)).await;
            }
            let _ = sink.close().await;
        }
        self.closed.send_replace(true);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// How a handle's inbound stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Closed,
    Errored,
    /// The peer finished and this side did not end within the grace period.
    Abandoned,
}

/// A frame as seen by the relay.
pub enum Relayed<M> {
    /// Text or binary payload, already converted for the peer.
    Data(M),
    /// The sender started or acknowledged a close.
    Close,
    /// Ping/pong, answered by the transport itself.
    Control,
}

/// A frame type that can be relayed to the opposite transport.
pub trait Frame: Sized {
    /// Frame type of the opposite transport.
    type Peer: Frame;

    fn relay(self) -> Relayed<Self::Peer>;

    /// Close frame reporting an internal error (1011).
    fn error_close(reason: &str) -> Self;
}

impl Frame for ws::Message {
    type Peer = tungstenite::Message;

    fn relay(self) -> Relayed<tungstenite::Message> {
        match self {
            ws::Message::Text(text) => {
                Relayed::Data(tungstenite::Message::Text(text.as_str().to_owned().into()))
            }
            ws::Message::Binary(data) => Relayed::Data(tungstenite::Message::Binary(data)),
            ws::Message::Close(_) => Relayed::Close,
            ws::Message::Ping(_) | ws::Message::Pong(_) => Relayed::Control,
        }
    }

    fn error_close(reason: &str) -> Self {
        ws::Message::Close(Some(ws::CloseFrame {
            code: ws::close_code::ERROR,
            reason: reason.to_owned().into(),
        }))
    }
}

impl Frame for tungstenite::Message {
    type Peer = ws::Message;

    fn relay(self) -> Relayed<ws::Message> {
        match self {
            tungstenite::Message::Text(text) => {
                Relayed::Data(ws::Message::Text(text.as_str().to_owned().into()))
            }
            tungstenite::Message::Binary(data) => Relayed::Data(ws::Message::Binary(data)),
            tungstenite::Message::Close(_) => Relayed::Close,
            tungstenite::Message::Ping(_)
            | tungstenite::Message::Pong(_)
            | tungstenite::Message::Frame(_) => Relayed::Control,
        }
    }

    fn error_close(reason: &str) -> Self {
        tungstenite::Message::Close(Some(tungstenite::protocol::CloseFrame {
            code: CloseCode::Error,
            reason: reason.to_owned().into(),
        }))
    }
}

/// Answer an upgrade request by bridging it to the upstream.
///
/// The upstream handshake runs first; its failure is returned as an error
/// while the client's upgrade is still unanswered.
pub async fn bridge(state: &AppState, request: Request<Body>) -> Result<Response, ProxyError> {
    let (mut parts, _body) = request.into_parts();
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, state)
        .await
        .map_err(ProxyError::Upgrade)?;

    let target = state.upstream.websocket_url(&parts.uri)?;
    let session = Session::new();
    tracing::info!(session = %session.id(), target = %target, "Establishing WebSocket connection");

    let mut handshake = target
        .as_str()
        .into_client_request()
        .map_err(ProxyError::Handshake)?;
    handshake
        .headers_mut()
        .extend(state.disguise.handshake(&parts.headers));

    let (upstream, response) = match connect_async(handshake).await {
        Ok(connected) => connected,
        Err(e) => {
            session.upstream().mark_closed();
            session.client().mark_closed();
            return Err(ProxyError::Handshake(e));
        }
    };
    session.upstream().open();

    let protocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let upgrade = match protocol {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    let id = session.id();
    Ok(upgrade
        .on_failed_upgrade(move |e| {
            tracing::warn!(session = %id, error = %e, "Client upgrade failed");
            metrics::record_error("upgrade");
        })
        .on_upgrade(move |client: WebSocket| open_session(session, client, upstream)))
}

async fn open_session(session: Session, client: WebSocket, upstream: UpstreamSocket) {
    session.client().open();
    session.run(client, upstream).await;
}
