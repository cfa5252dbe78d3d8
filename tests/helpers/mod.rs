//! Shared helpers for transport integration tests.
//!
//! Provides a configurable mock dispatcher (canned responses and per-method
//! delays) and a harness that runs the transport on an ephemeral port.
//!
//! Note: not every test file uses every helper; unused ones are fine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use streamgate::codec::{Request, Response};
use streamgate::dispatch::Dispatcher;
use streamgate::{HttpStreamTransport, SessionRegistry, TransportConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Header carrying the session token (mirrors the server constant).
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Mock dispatcher with canned results and per-method delays.
#[derive(Debug, Clone, Default)]
pub struct MockDispatcher {
    responses: HashMap<String, Value>,
    delays: HashMap<String, Duration>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the result returned for a method.
    pub fn with_response(mut self, method: &str, result: Value) -> Self {
        self.responses.insert(method.to_string(), result);
        self
    }

    /// Delay handling of a method (for deadline/ordering tests).
    pub fn with_delay(mut self, method: &str, delay: Duration) -> Self {
        self.delays.insert(method.to_string(), delay);
        self
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn handle(&self, request: Request) -> Response {
        if let Some(delay) = self.delays.get(&request.method) {
            tokio::time::sleep(*delay).await;
        }
        let result = self
            .responses
            .get(&request.method)
            .cloned()
            .unwrap_or_else(|| json!({ "echo": request.method }));
        Response::success(request.id, result)
    }
}

/// A transport running on an ephemeral port.
pub struct TestTransport {
    /// Base URL of the transport endpoint, e.g. `http://127.0.0.1:PORT/mcp`
    pub url: String,
    /// The transport's session registry (for state assertions)
    pub registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestTransport {
    /// Start the transport with the given config and dispatcher.
    pub async fn spawn(config: TransportConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let endpoint = config.endpoint.clone();
        let transport = HttpStreamTransport::new(config, dispatcher);
        let registry = transport.registry();
        let shutdown = transport.shutdown_token();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            transport.serve(listener).await.unwrap();
        });

        Self {
            url: format!("http://{addr}{endpoint}"),
            registry,
            shutdown,
            handle,
        }
    }

    /// Stop the transport and wait for teardown.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

/// A config with liveness disabled, for tests that do not exercise pings.
pub fn quiet_config() -> TransportConfig {
    TransportConfig {
        ping_frequency: Duration::ZERO,
        ping_timeout: Duration::ZERO,
        ..TransportConfig::default()
    }
}

/// Build a JSON-RPC request body.
pub fn request_body(id: i64, method: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method })
}

/// Incremental SSE frame reader over a streaming HTTP response.
///
/// Yields the JSON payload of each `data:` frame, skipping keep-alive
/// comment lines.
pub struct SseReader {
    stream: reqwest::Response,
    buffer: String,
}

impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            stream: response,
            buffer: String::new(),
        }
    }

    /// Next JSON data frame, or `None` once the stream closes.
    pub async fn next_json(&mut self) -> Option<Value> {
        loop {
            if let Some(value) = self.pop_frame() {
                return Some(value);
            }
            match self.stream.chunk().await {
                Ok(Some(chunk)) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                Ok(None) | Err(_) => return self.pop_frame(),
            }
        }
    }

    fn pop_frame(&mut self) -> Option<Value> {
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            for line in block.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(value) = serde_json::from_str(data) {
                        return Some(value);
                    }
                }
            }
            // Comment-only block (keep-alive); keep scanning.
        }
        None
    }
}
