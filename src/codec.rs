//! JSON-RPC 2.0 message codec.
//!
//! Parses and serializes the three wire message kinds (request, response,
//! notification) in both shapes clients may send: a bare JSON object or a
//! JSON array batch.
//!
//! # JSON-RPC 2.0 Compliance
//!
//! - Requests have `id`, `method`, and optional `params`
//! - Notifications are requests without `id`
//! - Responses carry `id` plus exactly one of `result` / `error`
//! - `id` type (string or integer) is preserved through encode/decode
//!
//! # Security Note
//!
//! This module parses untrusted input. The size ceiling is enforced on the
//! raw byte length before any parse is attempted, so an oversized payload
//! never costs more than a length comparison.

use std::borrow::Cow;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::jsonrpc::JsonRpcError;
use crate::error::TransportError;

/// JSON-RPC 2.0 version constant.
const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request/response id.
///
/// The wire type (string or integer) is preserved so responses echo the id
/// exactly as the peer sent it. `Null` represents an explicit `"id": null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    /// Integer id
    Number(i64),
    /// String id
    String(String),
    /// Explicit null id
    Null,
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC request: expects a correlated response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Always "2.0"
    pub jsonrpc: Cow<'static, str>,
    /// Request id echoed back in the response
    pub id: JsonRpcId,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a request.
    pub fn new(id: JsonRpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC response, correlated to a request by id.
///
/// The `id` field always serializes (explicit null when the request id could
/// not be determined), unlike requests where an absent id means
/// "notification".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Always "2.0"
    pub jsonrpc: Cow<'static, str>,
    /// Id of the request this responds to
    pub id: JsonRpcId,
    /// Result (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl Response {
    /// Create a success response.
    pub fn success(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC notification: no id, no response expected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Always "2.0"
    pub jsonrpc: Cow<'static, str>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Create a notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params,
        }
    }
}

/// One protocol message, classified after decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Request carrying an id
    Request(Request),
    /// Response correlated to a request
    Response(Response),
    /// Fire-and-forget notification
    Notification(Notification),
}

impl Message {
    /// The message id, if it carries one.
    pub fn id(&self) -> Option<&JsonRpcId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => Some(&r.id),
            Self::Notification(_) => None,
        }
    }
}

/// Decoded payload shape: clients may send a bare object or an array batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A single message object
    Single(Message),
    /// A JSON array of messages (non-empty)
    Batch(Vec<Message>),
}

impl Payload {
    /// Consume into a flat message list.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Single(m) => vec![m],
            Self::Batch(ms) => ms,
        }
    }
}

/// Distinguishes absent, explicit-null, and present id fields during decode.
#[derive(Debug, Default)]
enum MaybeNull<T> {
    #[default]
    Absent,
    Null,
    Present(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for MaybeNull<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            Ok(MaybeNull::Null)
        } else {
            T::deserialize(value)
                .map(MaybeNull::Present)
                .map_err(serde::de::Error::custom)
        }
    }
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<JsonRpcId>, D::Error>
where
    D: Deserializer<'de>,
{
    match MaybeNull::deserialize(deserializer)? {
        MaybeNull::Absent => Ok(None),
        MaybeNull::Null => Ok(Some(JsonRpcId::Null)),
        MaybeNull::Present(id) => Ok(Some(id)),
    }
}

/// `"result": null` is a valid success result and must not collapse into an
/// absent field.
fn deserialize_nullable_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match MaybeNull::<Value>::deserialize(deserializer)? {
        MaybeNull::Absent => Ok(None),
        MaybeNull::Null => Ok(Some(Value::Null)),
        MaybeNull::Present(value) => Ok(Some(value)),
    }
}

/// Raw wire message before classification. All fields optional so malformed
/// input produces a protocol error rather than a serde error.
#[derive(Debug, Deserialize)]
struct RawMessage {
    jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    id: Option<JsonRpcId>,
    method: Option<String>,
    params: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_nullable_value")]
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// Decode raw bytes into protocol message(s).
///
/// The size ceiling short-circuits before any parse. The first
/// non-whitespace byte selects the single-object or batch path without
/// materializing an intermediate `Value` for the common case.
///
/// # Arguments
///
/// * `bytes` - Raw JSON from the HTTP request body
/// * `max_size` - Configured maximum raw size in bytes
///
/// # Errors
///
/// * `PayloadTooLarge` - raw length exceeds `max_size` (checked first)
/// * `MalformedPayload` - not valid JSON
/// * `ProtocolViolation` - valid JSON that is not a JSON-RPC 2.0 message
pub fn decode(bytes: &[u8], max_size: usize) -> Result<Payload, TransportError> {
    if bytes.len() > max_size {
        return Err(TransportError::PayloadTooLarge {
            size: bytes.len(),
            limit: max_size,
        });
    }

    let first_byte = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| TransportError::MalformedPayload {
            details: "empty input".to_string(),
        })?;

    match first_byte {
        b'{' => {
            // Single-message fast path: deserialize straight into RawMessage,
            // skipping the intermediate Value allocation.
            let raw: RawMessage = serde_json::from_slice(bytes).map_err(|e| {
                // Distinguish syntax errors (bad JSON) from semantic errors
                // (valid JSON with invalid field values like float ids).
                if e.is_syntax() || e.is_eof() {
                    TransportError::MalformedPayload {
                        details: format!("invalid JSON: {e}"),
                    }
                } else {
                    TransportError::ProtocolViolation {
                        details: format!("invalid JSON-RPC structure: {e}"),
                    }
                }
            })?;
            Ok(Payload::Single(classify(raw)?))
        }
        b'[' => {
            let arr: Vec<Value> =
                serde_json::from_slice(bytes).map_err(|e| TransportError::MalformedPayload {
                    details: format!("invalid JSON: {e}"),
                })?;

            if arr.is_empty() {
                return Err(TransportError::ProtocolViolation {
                    details: "empty batch is not allowed".to_string(),
                });
            }

            let mut messages = Vec::with_capacity(arr.len());
            for item in arr {
                let raw: RawMessage = serde_json::from_value(item).map_err(|e| {
                    TransportError::ProtocolViolation {
                        details: format!("invalid JSON-RPC structure: {e}"),
                    }
                })?;
                messages.push(classify(raw)?);
            }
            Ok(Payload::Batch(messages))
        }
        _ => {
            // Attempt a parse to produce a proper error message either way.
            serde_json::from_slice::<Value>(bytes)
                .map_err(|e| TransportError::MalformedPayload {
                    details: format!("invalid JSON: {e}"),
                })
                .and_then(|_| {
                    Err(TransportError::ProtocolViolation {
                        details: "message must be an object or array".to_string(),
                    })
                })
        }
    }
}

/// Classify a raw wire message as request, notification, or response.
fn classify(raw: RawMessage) -> Result<Message, TransportError> {
    match raw.jsonrpc.as_deref() {
        Some(JSONRPC_VERSION) => {}
        Some(v) => {
            return Err(TransportError::ProtocolViolation {
                details: format!("invalid jsonrpc version: expected \"2.0\", got \"{v}\""),
            });
        }
        None => {
            return Err(TransportError::ProtocolViolation {
                details: "missing required field: jsonrpc".to_string(),
            });
        }
    }

    if let Some(method) = raw.method {
        if raw.result.is_some() || raw.error.is_some() {
            return Err(TransportError::ProtocolViolation {
                details: "message carries both method and result/error".to_string(),
            });
        }
        return Ok(match raw.id {
            Some(id) => Message::Request(Request {
                jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
                id,
                method,
                params: raw.params,
            }),
            None => Message::Notification(Notification {
                jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
                method,
                params: raw.params,
            }),
        });
    }

    // No method: must be a response with exactly one of result/error.
    let id = raw.id.ok_or_else(|| TransportError::ProtocolViolation {
        details: "response missing required field: id".to_string(),
    })?;
    match (raw.result, raw.error) {
        (Some(result), None) => Ok(Message::Response(Response {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: Some(result),
            error: None,
        })),
        (None, Some(error)) => Ok(Message::Response(Response {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: None,
            error: Some(error),
        })),
        (Some(_), Some(_)) => Err(TransportError::ProtocolViolation {
            details: "response carries both result and error".to_string(),
        }),
        (None, None) => Err(TransportError::ProtocolViolation {
            details: "message has no method, result, or error".to_string(),
        }),
    }
}

/// Encode a single message as a bare JSON object.
///
/// Total for well-formed in-memory messages; the only failure mode of
/// `serde_json` here would be a non-string map key, which these types
/// cannot contain.
pub fn encode(message: &Message) -> Bytes {
    Bytes::from(serde_json::to_vec(message).expect("message serialization is infallible"))
}

/// Encode a set of messages as a JSON array.
pub fn encode_batch(messages: &[Message]) -> Bytes {
    Bytes::from(serde_json::to_vec(messages).expect("message serialization is infallible"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MAX: usize = 4 * 1024 * 1024;

    #[test]
    fn test_decode_valid_request() {
        let raw = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"t"}}"#;
        let payload = decode(raw, MAX).expect("should parse");
        match payload {
            Payload::Single(Message::Request(req)) => {
                assert_eq!(req.id, JsonRpcId::Number(1));
                assert_eq!(req.method, "tools/call");
                assert!(req.params.is_some());
            }
            other => panic!("expected single request, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_notification() {
        let raw = br#"{"jsonrpc":"2.0","method":"notifications/progress"}"#;
        let payload = decode(raw, MAX).expect("should parse");
        assert!(matches!(
            payload,
            Payload::Single(Message::Notification(_))
        ));
    }

    #[test]
    fn test_decode_response_preserves_string_id() {
        let raw = br#"{"jsonrpc":"2.0","id":"ping-42","result":{}}"#;
        let payload = decode(raw, MAX).expect("should parse");
        match payload {
            Payload::Single(Message::Response(resp)) => {
                assert_eq!(resp.id, JsonRpcId::String("ping-42".to_string()));
                assert!(resp.result.is_some());
                assert!(resp.error.is_none());
            }
            other => panic!("expected single response, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_response_with_null_result() {
        // A null result is a valid success payload (ping acks use it).
        let raw = br#"{"jsonrpc":"2.0","id":7,"result":null}"#;
        let payload = decode(raw, MAX).expect("should parse");
        match payload {
            Payload::Single(Message::Response(resp)) => {
                assert_eq!(resp.result, Some(serde_json::Value::Null));
                assert!(resp.error.is_none());
            }
            other => panic!("expected single response, got {other:?}"),
        }

        // And it survives the round trip.
        let msg = Message::Response(Response::success(
            JsonRpcId::Number(7),
            serde_json::Value::Null,
        ));
        let decoded = decode(&encode(&msg), MAX).expect("should parse");
        assert_eq!(decoded, Payload::Single(msg));
    }

    #[test]
    fn test_decode_batch() {
        let raw = br#"[
            {"jsonrpc":"2.0","id":1,"method":"a"},
            {"jsonrpc":"2.0","method":"b"},
            {"jsonrpc":"2.0","id":2,"result":null}
        ]"#;
        let payload = decode(raw, MAX).expect("should parse");
        match payload {
            Payload::Batch(msgs) => {
                assert_eq!(msgs.len(), 3);
                assert!(matches!(msgs[0], Message::Request(_)));
                assert!(matches!(msgs[1], Message::Notification(_)));
                assert!(matches!(msgs[2], Message::Response(_)));
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_empty_batch_rejected() {
        let err = decode(b"[]", MAX).unwrap_err();
        assert!(matches!(err, TransportError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = decode(b"{not json", MAX).unwrap_err();
        assert!(matches!(err, TransportError::MalformedPayload { .. }));
    }

    #[test]
    fn test_decode_missing_version() {
        let err = decode(br#"{"id":1,"method":"a"}"#, MAX).unwrap_err();
        assert!(matches!(err, TransportError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_decode_wrong_version() {
        let err = decode(br#"{"jsonrpc":"1.0","id":1,"method":"a"}"#, MAX).unwrap_err();
        assert!(matches!(err, TransportError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_decode_response_without_result_or_error() {
        let err = decode(br#"{"jsonrpc":"2.0","id":1}"#, MAX).unwrap_err();
        assert!(matches!(err, TransportError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_decode_response_with_both_result_and_error() {
        let raw = br#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":-1,"message":"x"}}"#;
        let err = decode(raw, MAX).unwrap_err();
        assert!(matches!(err, TransportError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_decode_scalar_rejected() {
        let err = decode(b"42", MAX).unwrap_err();
        assert!(matches!(err, TransportError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_size_ceiling_short_circuits_before_parse() {
        // Deliberately invalid JSON: the size check must fire first for any
        // content.
        let oversized = vec![b'x'; 64];
        let err = decode(&oversized, 32).unwrap_err();
        assert_eq!(
            err,
            TransportError::PayloadTooLarge {
                size: 64,
                limit: 32
            }
        );
    }

    #[test]
    fn test_roundtrip_request() {
        let msg = Message::Request(Request::new(
            JsonRpcId::String("req-7".to_string()),
            "tools/list",
            Some(json!({"cursor": null})),
        ));
        let decoded = decode(&encode(&msg), MAX).expect("should parse");
        assert_eq!(decoded, Payload::Single(msg));
    }

    #[test]
    fn test_roundtrip_response_and_notification() {
        let msgs = vec![
            Message::Response(Response::success(JsonRpcId::Number(3), json!({"ok": true}))),
            Message::Notification(Notification::new("log", Some(json!(["line"])))),
        ];
        let decoded = decode(&encode_batch(&msgs), MAX).expect("should parse");
        assert_eq!(decoded, Payload::Batch(msgs));
    }

    #[test]
    fn test_explicit_null_id_is_preserved() {
        let raw = br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"parse"}}"#;
        let payload = decode(raw, MAX).expect("should parse");
        match payload {
            Payload::Single(Message::Response(resp)) => assert_eq!(resp.id, JsonRpcId::Null),
            other => panic!("expected response, got {other:?}"),
        }
    }
}
