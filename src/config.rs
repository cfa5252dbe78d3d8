//! Centralized configuration for the stream transport.
//!
//! All options are resolved once at startup (defaults, then environment
//! overrides, then validation) and never re-read mid-request. Handlers see
//! an immutable [`TransportConfig`] behind an `Arc`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Default maximum message size: 4 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Default ping frequency: 30 seconds. Zero disables pings.
pub const DEFAULT_PING_FREQUENCY: Duration = Duration::from_millis(30_000);

/// Default ping ack timeout: 10 seconds.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default batch collection window: 30 seconds. Zero flushes on the first
/// message.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default capacity of the per-session pending delivery queue.
pub const DEFAULT_PENDING_QUEUE_CAPACITY: usize = 256;

/// Response delivery mode for newly created sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Server-push delivery over a long-lived SSE connection.
    Stream,
    /// Single JSON array reply after a bounded collection window.
    Batch,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for ResponseMode {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(Self::Stream),
            "batch" => Ok(Self::Batch),
            other => Err(TransportError::ProtocolViolation {
                details: format!("invalid response mode '{other}' (expected stream|batch)"),
            }),
        }
    }
}

/// CORS policy applied to every response on the transport endpoint.
///
/// Resolved once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// `Access-Control-Allow-Origin` value
    pub allow_origin: String,
    /// `Access-Control-Allow-Methods` value
    pub allow_methods: String,
    /// `Access-Control-Allow-Headers` value
    pub allow_headers: String,
    /// `Access-Control-Expose-Headers` value
    pub expose_headers: String,
    /// `Access-Control-Max-Age` value in seconds
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, DELETE, OPTIONS".to_string(),
            allow_headers: "Content-Type, Accept, Authorization, x-api-key, Mcp-Session-Id"
                .to_string(),
            expose_headers: "Content-Type, Authorization, x-api-key, Mcp-Session-Id".to_string(),
            max_age_secs: 86_400,
        }
    }
}

/// Runtime configuration for the HTTP stream transport.
///
/// Every option is defaulted; `from_env` overrides from `STREAMGATE_*`
/// environment variables and `validate` rejects inconsistent combinations
/// before the server starts.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on
    pub port: u16,

    /// Endpoint path for transport communication (e.g. "/mcp")
    pub endpoint: String,

    /// Delivery mode assigned to newly created sessions
    pub response_mode: ResponseMode,

    /// Batch collection window. Zero flushes on the first message.
    pub batch_timeout: Duration,

    /// Maximum raw message size in bytes (checked before parse)
    pub max_message_size: usize,

    /// Interval between liveness probes. Zero disables liveness enforcement.
    pub ping_frequency: Duration,

    /// How long to wait for a ping ack before evicting the session
    pub ping_timeout: Duration,

    /// Capacity of the per-session pending queue used while no stream
    /// handle is attached. Overflow drops the oldest message.
    pub pending_queue_capacity: usize,

    /// CORS policy
    pub cors: CorsConfig,

    /// Static API key; when set, requests must carry it in `x-api-key`
    pub api_key: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            endpoint: "/mcp".to_string(),
            response_mode: ResponseMode::Stream,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            ping_frequency: DEFAULT_PING_FREQUENCY,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            pending_queue_capacity: DEFAULT_PENDING_QUEUE_CAPACITY,
            cors: CorsConfig::default(),
            api_key: None,
        }
    }
}

fn env_var<T: FromStr>(name: &str) -> Result<Option<T>, TransportError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| TransportError::ProtocolViolation {
                details: format!("invalid value '{raw}' for {name}"),
            }),
        Err(_) => Ok(None),
    }
}

impl TransportConfig {
    /// Load configuration from environment variables on top of defaults.
    ///
    /// # Environment Variables
    ///
    /// - `STREAMGATE_PORT` (default: 8080)
    /// - `STREAMGATE_ENDPOINT` (default: "/mcp")
    /// - `STREAMGATE_RESPONSE_MODE` (default: "stream")
    /// - `STREAMGATE_BATCH_TIMEOUT_MS` (default: 30000)
    /// - `STREAMGATE_MAX_MESSAGE_SIZE` (default: 4194304)
    /// - `STREAMGATE_PING_FREQUENCY_MS` (default: 30000, 0 disables)
    /// - `STREAMGATE_PING_TIMEOUT_MS` (default: 10000)
    /// - `STREAMGATE_PENDING_QUEUE_CAPACITY` (default: 256)
    /// - `STREAMGATE_API_KEY` (default: unset)
    /// - `STREAMGATE_CORS_ALLOW_ORIGIN` and friends for the CORS block
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if any variable carries an unparseable
    /// value, or any validation failure from [`Self::validate`].
    pub fn from_env() -> Result<Self, TransportError> {
        let mut config = Self::default();

        if let Some(port) = env_var("STREAMGATE_PORT")? {
            config.port = port;
        }
        if let Ok(endpoint) = std::env::var("STREAMGATE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(mode) = std::env::var("STREAMGATE_RESPONSE_MODE") {
            config.response_mode = mode.parse()?;
        }
        if let Some(ms) = env_var::<u64>("STREAMGATE_BATCH_TIMEOUT_MS")? {
            config.batch_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = env_var("STREAMGATE_MAX_MESSAGE_SIZE")? {
            config.max_message_size = bytes;
        }
        if let Some(ms) = env_var::<u64>("STREAMGATE_PING_FREQUENCY_MS")? {
            config.ping_frequency = Duration::from_millis(ms);
        }
        if let Some(ms) = env_var::<u64>("STREAMGATE_PING_TIMEOUT_MS")? {
            config.ping_timeout = Duration::from_millis(ms);
        }
        if let Some(cap) = env_var("STREAMGATE_PENDING_QUEUE_CAPACITY")? {
            config.pending_queue_capacity = cap;
        }
        if let Ok(key) = std::env::var("STREAMGATE_API_KEY") {
            config.api_key = Some(key);
        }

        if let Ok(origin) = std::env::var("STREAMGATE_CORS_ALLOW_ORIGIN") {
            config.cors.allow_origin = origin;
        }
        if let Ok(methods) = std::env::var("STREAMGATE_CORS_ALLOW_METHODS") {
            config.cors.allow_methods = methods;
        }
        if let Ok(headers) = std::env::var("STREAMGATE_CORS_ALLOW_HEADERS") {
            config.cors.allow_headers = headers;
        }
        if let Ok(headers) = std::env::var("STREAMGATE_CORS_EXPOSE_HEADERS") {
            config.cors.expose_headers = headers;
        }
        if let Some(secs) = env_var("STREAMGATE_CORS_MAX_AGE_SECS")? {
            config.cors.max_age_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` describing the first invalid field.
    pub fn validate(&self) -> Result<(), TransportError> {
        if !self.endpoint.starts_with('/') {
            return Err(TransportError::ProtocolViolation {
                details: format!("endpoint '{}' must start with '/'", self.endpoint),
            });
        }
        if self.max_message_size == 0 {
            return Err(TransportError::ProtocolViolation {
                details: "max_message_size must be greater than zero".to_string(),
            });
        }
        if self.pending_queue_capacity == 0 {
            return Err(TransportError::ProtocolViolation {
                details: "pending_queue_capacity must be greater than zero".to_string(),
            });
        }
        if !self.ping_frequency.is_zero() && self.ping_timeout.is_zero() {
            return Err(TransportError::ProtocolViolation {
                details: "ping_timeout must be non-zero when pings are enabled".to_string(),
            });
        }
        Ok(())
    }

    /// Returns true if liveness enforcement is enabled.
    pub fn pings_enabled(&self) -> bool {
        !self.ping_frequency.is_zero()
    }
}
