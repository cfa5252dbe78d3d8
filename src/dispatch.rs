//! RPC dispatcher seam.
//!
//! The transport hands every decoded request to a [`Dispatcher`] and routes
//! whatever response it produces; the method logic itself lives outside
//! this crate. Dispatch may be arbitrarily asynchronous - the transport
//! suspends per request and never cancels work already in progress (late
//! results for a closed session are discarded by the router).

use async_trait::async_trait;

use crate::codec::{Notification, Request, Response};
use crate::error::jsonrpc::JsonRpcError;

/// Executes RPC method logic and produces response payloads.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Handle one request and produce its response.
    async fn handle(&self, request: Request) -> Response;

    /// Handle a notification (no response expected).
    ///
    /// The default implementation ignores it.
    async fn notify(&self, _notification: Notification) {}
}

/// Dispatcher that answers `ping` and rejects every other method.
///
/// Used by the standalone binary so the transport can run without an
/// application wired in; real deployments supply their own [`Dispatcher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDispatcher;

#[async_trait]
impl Dispatcher for NullDispatcher {
    async fn handle(&self, request: Request) -> Response {
        if request.method == crate::liveness::PING_METHOD {
            return Response::success(request.id, serde_json::json!({}));
        }
        Response::error(
            request.id,
            JsonRpcError::new(-32601, format!("Method '{}' not found", request.method)),
        )
    }
}
