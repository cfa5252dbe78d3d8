//! HTTP front door for the stream transport.
//!
//! Mounts the configured endpoint on an axum router and runs the per-request
//! pipeline: CORS policy, payload ceiling, credential validation, session
//! resolution, codec decode, dispatch, and delivery routing.
//!
//! # HTTP Surface
//!
//! - `POST` - submit message(s). Batch-mode sessions receive the flushed
//!   JSON array as the reply; stream-mode sessions receive `202 Accepted`
//!   and the responses arrive on the session's stream.
//! - `GET` - attach the session's live SSE stream handle. Held open until
//!   client disconnect, explicit close, or liveness eviction.
//! - `DELETE` - explicit session close.
//! - `OPTIONS` - CORS preflight.
//!
//! The session token travels in the `Mcp-Session-Id` header; a request
//! without one creates a session and the token is echoed back.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Request as HttpRequest, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response as HttpResponse,
    },
    routing::post,
    Router,
};
use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AllowAll, ApiKeyValidator, AuthValidator};
use crate::batch::BatchWindow;
use crate::codec::{self, JsonRpcId, Message, Notification, Request, Response};
use crate::config::{ResponseMode, TransportConfig};
use crate::dispatch::Dispatcher;
use crate::error::TransportError;
use crate::liveness::PingMonitor;
use crate::router::DeliveryRouter;
use crate::session::{Session, SessionRegistry};

/// Header carrying the session token.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Shared state for all request handlers.
pub struct TransportState {
    config: TransportConfig,
    registry: Arc<SessionRegistry>,
    router: DeliveryRouter,
    dispatcher: Arc<dyn Dispatcher>,
    auth: Arc<dyn AuthValidator>,
}

/// The HTTP stream transport server.
///
/// Owns the session registry, the delivery router, and the liveness
/// monitor's cancellation token. The dispatcher and auth validator are
/// injected collaborators.
pub struct HttpStreamTransport {
    state: Arc<TransportState>,
    cancel: CancellationToken,
}

impl HttpStreamTransport {
    /// Create a transport.
    ///
    /// The auth validator is derived from the configuration: a static API
    /// key when `api_key` is set, otherwise allow-all.
    pub fn new(config: TransportConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let auth: Arc<dyn AuthValidator> = match &config.api_key {
            Some(key) => Arc::new(ApiKeyValidator::new(key.clone())),
            None => Arc::new(AllowAll),
        };
        Self::with_validator(config, dispatcher, auth)
    }

    /// Create a transport with an explicit auth validator.
    pub fn with_validator(
        config: TransportConfig,
        dispatcher: Arc<dyn Dispatcher>,
        auth: Arc<dyn AuthValidator>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let router = DeliveryRouter::new(registry.clone(), config.pending_queue_capacity);
        Self {
            state: Arc::new(TransportState {
                config,
                registry,
                router,
                dispatcher,
                auth,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// The shared session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.state.registry.clone()
    }

    /// Token that stops the server and the liveness monitor when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build the axum application.
    pub fn app(&self) -> Router {
        let state = self.state.clone();
        // Slack above the message ceiling so the handler sees oversized
        // bodies and can produce the JSON-RPC error itself.
        let body_limit = state.config.max_message_size.saturating_add(64 * 1024);

        Router::new()
            .route(
                &state.config.endpoint,
                post(handle_post)
                    .get(handle_get)
                    .delete(handle_delete)
                    .options(handle_options),
            )
            .layer(middleware::from_fn_with_state(state.clone(), apply_cors))
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(state)
    }

    /// Run the transport on an already-bound listener until shutdown.
    ///
    /// Spawns the liveness monitor (unless pings are disabled), serves HTTP
    /// with graceful shutdown on the cancellation token, and tears down all
    /// sessions on exit.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let monitor = if self.state.config.pings_enabled() {
            let monitor = PingMonitor::new(
                self.state.registry.clone(),
                self.state.config.ping_frequency,
                self.state.config.ping_timeout,
            );
            Some(monitor.spawn(self.cancel.child_token()))
        } else {
            info!("liveness monitor disabled (ping frequency is zero)");
            None
        };

        info!(
            addr = %listener.local_addr()?,
            endpoint = %self.state.config.endpoint,
            mode = %self.state.config.response_mode,
            "transport listening"
        );

        let cancel = self.cancel.clone();
        axum::serve(listener, self.app())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;

        if let Some(handle) = monitor {
            let _ = handle.await;
        }
        self.state.registry.clear();
        info!("transport stopped, all sessions closed");
        Ok(())
    }

    /// Bind the configured port and serve.
    pub async fn bind_and_serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.state.config.port)).await?;
        self.serve(listener).await
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Enforce the origin rule and annotate every response with the configured
/// CORS headers.
async fn apply_cors(
    State(state): State<Arc<TransportState>>,
    request: HttpRequest,
    next: Next,
) -> HttpResponse {
    let cors = &state.config.cors;

    if cors.allow_origin != "*" {
        if let Some(origin) = request.headers().get(header::ORIGIN) {
            if origin.to_str().ok() != Some(cors.allow_origin.as_str()) {
                debug!(?origin, "origin rejected by CORS policy");
                return StatusCode::FORBIDDEN.into_response();
            }
        }
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    insert_header(headers, "access-control-allow-origin", &cors.allow_origin);
    insert_header(headers, "access-control-allow-methods", &cors.allow_methods);
    insert_header(headers, "access-control-allow-headers", &cors.allow_headers);
    insert_header(headers, "access-control-expose-headers", &cors.expose_headers);
    insert_header(
        headers,
        "access-control-max-age",
        &cors.max_age_secs.to_string(),
    );
    response
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(name, value, "invalid header value in CORS config"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Resolved session plus whether this request created it.
#[derive(Debug)]
struct ResolvedSession {
    session: Arc<Session>,
    created: bool,
}

/// Resolve the session from the header, creating one when absent.
fn resolve_session(
    state: &TransportState,
    headers: &HeaderMap,
) -> Result<ResolvedSession, TransportError> {
    match headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) => state
            .registry
            .get(id)
            .map(|session| ResolvedSession {
                session,
                created: false,
            })
            .ok_or_else(|| TransportError::SessionNotFound {
                session_id: id.to_string(),
            }),
        None => Ok(ResolvedSession {
            session: state.registry.create(state.config.response_mode),
            created: true,
        }),
    }
}

/// Build an HTTP error response with a JSON-RPC error body.
fn error_response(err: &TransportError) -> HttpResponse {
    let body = codec::encode(&Message::Response(Response::error(
        JsonRpcId::Null,
        err.to_jsonrpc_error(),
    )));
    (
        err.http_status(),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

fn session_header_value(session: &Session) -> Option<(&'static str, HeaderValue)> {
    HeaderValue::from_str(session.id())
        .ok()
        .map(|value| (SESSION_HEADER, value))
}

/// Spawn dispatch of one request; the eventual result goes through the
/// delivery router. Late results for a closed session are discarded here,
/// not surfaced to the (absent) client.
fn spawn_dispatch(state: &Arc<TransportState>, session_id: String, request: Request) {
    let dispatcher = state.dispatcher.clone();
    let router = state.router.clone();
    tokio::spawn(async move {
        let response = dispatcher.handle(request).await;
        match router.deliver(&session_id, Message::Response(response)).await {
            Ok(()) => {}
            Err(TransportError::SessionNotFound { .. }) => {
                debug!(session_id, "discarding late result for closed session");
            }
            Err(err) => {
                warn!(session_id, %err, "delivery failed");
            }
        }
    });
}

/// POST: submit message(s).
async fn handle_post(
    State(state): State<Arc<TransportState>>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    if let Err(err) = state.auth.validate(&headers).await {
        return error_response(&err);
    }

    // Size ceiling and decode. The codec short-circuits on raw length
    // before parsing anything.
    let payload = match codec::decode(&body, state.config.max_message_size) {
        Ok(payload) => payload,
        Err(err) => return error_response(&err),
    };

    let resolved = match resolve_session(&state, &headers) {
        Ok(resolved) => resolved,
        Err(err) => return error_response(&err),
    };
    let session = resolved.session;
    let session_id = session.id().to_string();

    // Partition the payload. Client responses correlate against
    // server-issued request ids (ping acks); orphans reject the POST.
    let mut requests: Vec<Request> = Vec::new();
    let mut notifications: Vec<Notification> = Vec::new();
    for message in payload.into_messages() {
        match message {
            Message::Request(req) => requests.push(req),
            Message::Notification(n) => notifications.push(n),
            Message::Response(resp) => {
                if !session.correlate_response(&resp.id).await {
                    let err = TransportError::ProtocolViolation {
                        details: format!("orphaned response id: {}", resp.id),
                    };
                    return error_response(&err);
                }
            }
        }
    }

    session.touch().await;

    for notification in notifications {
        let dispatcher = state.dispatcher.clone();
        tokio::spawn(async move { dispatcher.notify(notification).await });
    }

    let mut response = match session.mode() {
        ResponseMode::Stream => {
            for request in requests {
                spawn_dispatch(&state, session_id.clone(), request);
            }
            StatusCode::ACCEPTED.into_response()
        }
        ResponseMode::Batch => {
            if requests.is_empty() {
                StatusCode::ACCEPTED.into_response()
            } else {
                match handle_batch_cycle(&state, &session, requests).await {
                    Ok(response) => response,
                    Err(err) => return error_response(&err),
                }
            }
        }
    };

    if resolved.created {
        if let Some((name, value)) = session_header_value(&session) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// Run one batch-mode request cycle: open the window, dispatch, and wait
/// for the flush (all awaited ids resolved) or the deadline.
async fn handle_batch_cycle(
    state: &Arc<TransportState>,
    session: &Arc<Session>,
    requests: Vec<Request>,
) -> Result<HttpResponse, TransportError> {
    let session_id = session.id().to_string();
    let awaited: HashSet<JsonRpcId> = requests.iter().map(|r| r.id.clone()).collect();
    let batch_timeout = state.config.batch_timeout;
    let flush_on_first = batch_timeout.is_zero();

    let rx = {
        let mut guard = session.state.lock().await;
        if guard.batch.is_some() {
            return Err(TransportError::ProtocolViolation {
                details: "a batch cycle is already in progress for this session".to_string(),
            });
        }
        let (window, rx) = BatchWindow::open(awaited, flush_on_first);
        guard.batch = Some(window);
        rx
    };

    for request in requests {
        spawn_dispatch(state, session_id.clone(), request);
    }

    let mut rx = rx;
    let flushed = if flush_on_first {
        (&mut rx).await.ok()
    } else {
        tokio::select! {
            result = &mut rx => result.ok(),
            _ = tokio::time::sleep(batch_timeout) => {
                // Deadline. Flush whatever the window collected. The window
                // may also have completed in the race; then it is already
                // gone and the completed buffer sits on the channel.
                let taken = {
                    let mut guard = session.state.lock().await;
                    guard.batch.take()
                };
                match taken {
                    Some(window) => Some(window.flush()),
                    None => rx.try_recv().ok(),
                }
            }
        }
    };

    match flushed {
        Some(messages) => {
            session.touch().await;
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                codec::encode_batch(&messages),
            )
                .into_response())
        }
        // Completion channel dropped without a flush: the session was torn
        // down mid-cycle. The client observes closure, not a stale reply.
        None => Err(TransportError::SessionNotFound { session_id }),
    }
}

/// GET: attach the live SSE stream handle for a stream-mode session.
async fn handle_get(
    State(state): State<Arc<TransportState>>,
    headers: HeaderMap,
) -> HttpResponse {
    if let Err(err) = state.auth.validate(&headers).await {
        return error_response(&err);
    }

    // Mode is fixed transport-wide, so reject before touching the registry:
    // a refused GET must not leave a session behind.
    if state.config.response_mode != ResponseMode::Stream {
        let err = TransportError::ProtocolViolation {
            details: "stream connections are not available in batch mode".to_string(),
        };
        return error_response(&err);
    }

    let resolved = match resolve_session(&state, &headers) {
        Ok(resolved) => resolved,
        Err(err) => return error_response(&err),
    };
    let session = resolved.session;

    let rx = session
        .attach_stream(state.config.pending_queue_capacity)
        .await;
    debug!(session_id = %session.id(), "stream handle attached");

    let stream = ReceiverStream::new(rx).map(|frame| {
        Ok::<Event, Infallible>(
            Event::default()
                .event("message")
                .data(String::from_utf8_lossy(&frame)),
        )
    });

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );

    let mut response = sse.into_response();
    if let Some((name, value)) = session_header_value(&session) {
        response.headers_mut().insert(name, value);
    }
    response
}

/// DELETE: explicit session close.
async fn handle_delete(
    State(state): State<Arc<TransportState>>,
    headers: HeaderMap,
) -> HttpResponse {
    if let Err(err) = state.auth.validate(&headers).await {
        return error_response(&err);
    }

    let Some(id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        let err = TransportError::ProtocolViolation {
            details: format!("missing {SESSION_HEADER} header"),
        };
        return error_response(&err);
    };

    match state.registry.remove(id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error_response(&TransportError::SessionNotFound {
            session_id: id.to_string(),
        }),
    }
}

/// OPTIONS: CORS preflight. Headers are applied by the middleware.
async fn handle_options() -> StatusCode {
    StatusCode::NO_CONTENT
}
