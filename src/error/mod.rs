//! Error handling for the stream transport.
//!
//! This module defines all error types the transport can surface and their
//! mapping onto JSON-RPC 2.0 error responses and HTTP status codes.
//!
//! ## Module Organization
//!
//! - `jsonrpc` - JSON-RPC 2.0 error response structures
//! - `TransportError` - the transport error taxonomy
//!
//! ## Propagation Policy
//!
//! Decode/validation errors and auth failures are surfaced to the client as
//! HTTP error responses with a JSON-RPC error body; they never crash the
//! session or the transport. Liveness timeouts are handled internally
//! (session teardown) and are only observable as connection closure.

pub mod jsonrpc;

use http::StatusCode;
use jsonrpc::{ErrorData, JsonRpcError};
use thiserror::Error;

/// All error types the transport can produce.
///
/// Each variant maps to a JSON-RPC error code and an HTTP status.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// Request body is not valid JSON.
    #[error("Malformed payload: {details}")]
    MalformedPayload {
        /// Description of the parse error
        details: String,
    },

    /// Payload is valid JSON but violates the JSON-RPC 2.0 protocol
    /// (missing method, bad version, orphaned response id, etc.).
    #[error("Protocol violation: {details}")]
    ProtocolViolation {
        /// Description of the violation
        details: String,
    },

    /// Raw payload exceeds the configured maximum message size.
    ///
    /// Checked before any parse is attempted, so an oversized body never
    /// costs more than a length comparison.
    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Observed payload size in bytes
        size: usize,
        /// Configured maximum in bytes
        limit: usize,
    },

    /// Credential validation failed.
    #[error("Unauthorized: {reason}")]
    Unauthorized {
        /// Reason for the rejection (safe for client consumption)
        reason: String,
    },

    /// The session id does not exist in the registry.
    #[error("Session '{session_id}' not found")]
    SessionNotFound {
        /// The session id that was not found
        session_id: String,
    },

    /// The session's pending delivery queue overflowed.
    ///
    /// The oldest queued message was dropped. Surfaced to the caller of
    /// `deliver` so it can decide to retry, drop, or log; the transport
    /// never retries delivery silently.
    #[error("Delivery queue full for session '{session_id}', oldest message dropped")]
    Backpressure {
        /// The session whose queue overflowed
        session_id: String,
    },

    /// A message arrived for a batch window that has already flushed.
    ///
    /// Logged and dropped; never delivered to a stale or reused window.
    #[error("Late delivery for session '{session_id}': batch window already flushed")]
    LateDelivery {
        /// The session whose window was already closed
        session_id: String,
    },

    /// A ping probe was not acknowledged within the configured timeout.
    ///
    /// Handled internally by session teardown; clients observe connection
    /// closure rather than a protocol error.
    #[error("Session '{session_id}' timed out waiting for ping ack")]
    TimedOut {
        /// The session that failed its liveness probe
        session_id: String,
    },
}

impl TransportError {
    /// The JSON-RPC 2.0 error code for this error.
    ///
    /// Standard codes are used where defined (-32700 parse error, -32600
    /// invalid request); transport-specific conditions use the -32000 range.
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            Self::MalformedPayload { .. } => -32700,
            Self::ProtocolViolation { .. } => -32600,
            Self::PayloadTooLarge { .. } => -32600,
            Self::Unauthorized { .. } => -32000,
            Self::SessionNotFound { .. } => -32001,
            Self::Backpressure { .. } => -32002,
            Self::LateDelivery { .. } => -32003,
            Self::TimedOut { .. } => -32004,
        }
    }

    /// Machine-readable error type name for the `data.error_type` field.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Unauthorized { .. } => "unauthorized",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::Backpressure { .. } => "backpressure",
            Self::LateDelivery { .. } => "late_delivery",
            Self::TimedOut { .. } => "timed_out",
        }
    }

    /// The HTTP status code used when this error is surfaced to a client.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            Self::ProtocolViolation { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Backpressure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::LateDelivery { .. } => StatusCode::CONFLICT,
            Self::TimedOut { .. } => StatusCode::REQUEST_TIMEOUT,
        }
    }

    /// Convert to a JSON-RPC 2.0 error object for the response body.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        let details = match self {
            Self::PayloadTooLarge { size, limit } => Some(serde_json::json!({
                "size": size,
                "limit": limit,
            })),
            Self::SessionNotFound { session_id }
            | Self::Backpressure { session_id }
            | Self::LateDelivery { session_id }
            | Self::TimedOut { session_id } => Some(serde_json::json!({
                "session_id": session_id,
            })),
            _ => None,
        };

        JsonRpcError {
            code: self.jsonrpc_code(),
            message: self.to_string(),
            data: Some(ErrorData {
                error_type: self.error_type().to_string(),
                details,
            }),
        }
    }
}
