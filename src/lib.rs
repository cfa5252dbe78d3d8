//! Streamgate - HTTP stream transport for bidirectional JSON-RPC.
//!
//! This crate implements the transport layer for a JSON-RPC 2.0
//! request/response/notification protocol carried over HTTP. Two response
//! delivery modes are supported:
//!
//! - **Stream mode**: responses are pushed to the client over a long-lived
//!   Server-Sent Events connection as they are produced.
//! - **Batch mode**: responses are accumulated for a bounded time window and
//!   returned as a single JSON array.
//!
//! The transport owns session admission, liveness (ping/ack), message
//! routing, and teardown. RPC method execution and credential validation are
//! consumed through the [`dispatch::Dispatcher`] and [`auth::AuthValidator`]
//! seams and are not implemented here.
//!
//! # Request Flow
//!
//! ```text
//! HTTP request → front door (CORS, size, auth)
//!              → codec decode
//!              → session registry (lookup/create)
//!              → dispatcher
//!              → delivery router → SSE push | batch window
//! ```
//!
//! The ping monitor runs as an independent background task. It pushes probes
//! directly onto each session's stream handle rather than through the
//! delivery router, so a probe never refreshes the session's activity clock.

pub mod auth;
pub mod batch;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod liveness;
pub mod router;
pub mod server;
pub mod session;

pub use auth::{AllowAll, ApiKeyValidator, AuthValidator, Identity};
pub use config::{CorsConfig, ResponseMode, TransportConfig};
pub use dispatch::Dispatcher;
pub use error::TransportError;
pub use server::HttpStreamTransport;
pub use session::{SessionId, SessionRegistry};
