//! JSON-RPC 2.0 error response structures.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 error object.
///
/// This structure is embedded in JSON-RPC error responses and follows
/// the JSON-RPC 2.0 specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard or transport-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

impl JsonRpcError {
    /// Create an error object without additional data.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Additional error context data.
///
/// Contains structured error information for debugging. All fields are safe
/// for client consumption (no sensitive data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Machine-readable error type name
    pub error_type: String,

    /// Type-specific error details (sanitized)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
