//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, dispatch on `Upgrade: websocket`)
//!     → request.rs (disguise headers, detect upgrades)
//!     → relay.rs (plain HTTP, streamed both ways)
//!       or websocket.rs (upstream handshake, then full-duplex bridge)
//!     → response.rs (CORS override, error bodies)
//!     → Send to client
//! ```

pub mod relay;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::Disguise;
pub use server::{AppState, HttpServer};
pub use websocket::{HandleState, Session};
