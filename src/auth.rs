//! Credential validation seam.
//!
//! The transport consumes authentication as a pass/fail + identity
//! interface; it never implements credential mechanics itself. Validation
//! runs before any session or message processing.

use async_trait::async_trait;
use http::HeaderMap;

use crate::error::TransportError;

/// The authenticated principal a validator resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque subject identifier (user id, key id, ...)
    pub subject: String,
}

/// Validates request credentials.
///
/// Implementations inspect whatever headers their scheme requires and
/// either resolve an [`Identity`] or reject with
/// [`TransportError::Unauthorized`].
#[async_trait]
pub trait AuthValidator: Send + Sync {
    /// Validate the credentials carried on a request.
    async fn validate(&self, headers: &HeaderMap) -> Result<Identity, TransportError>;
}

/// Accepts every request as an anonymous identity.
///
/// The default when no auth is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AuthValidator for AllowAll {
    async fn validate(&self, _headers: &HeaderMap) -> Result<Identity, TransportError> {
        Ok(Identity {
            subject: "anonymous".to_string(),
        })
    }
}

/// Validates a static API key carried in the `x-api-key` header.
#[derive(Debug, Clone)]
pub struct ApiKeyValidator {
    key: String,
}

impl ApiKeyValidator {
    /// Create a validator for the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl AuthValidator for ApiKeyValidator {
    async fn validate(&self, headers: &HeaderMap) -> Result<Identity, TransportError> {
        let presented = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TransportError::Unauthorized {
                reason: "missing x-api-key header".to_string(),
            })?;

        if presented == self.key {
            Ok(Identity {
                subject: "api-key".to_string(),
            })
        } else {
            Err(TransportError::Unauthorized {
                reason: "invalid api key".to_string(),
            })
        }
    }
}
