//! Wire types exchanged with the OAuth2 authorization server and returned to
//! host callers.

use serde::{Deserialize, Serialize};

use crate::error::ProtectionError;

// ---------------------------------------------------------------------------
// Client-credentials grant
// ---------------------------------------------------------------------------

/// Successful token response from the authorization endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer token to present to downstream APIs.
    pub access_token: String,
    /// Lifetime of the token in seconds, counted from issuance.
    pub expires_in: u64,
    /// Usually `"Bearer"`; not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Granted scope, if the server reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Error body an OAuth2 server may return with a non-2xx status (RFC 6749 §5.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    /// Error code such as `"invalid_client"`.
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error body a host returns for a [`ProtectionError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"bad_ciphertext"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
    /// Whether the caller may retry later.
    pub retryable: bool,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }
}

impl From<&ProtectionError> for ErrorResponse {
    fn from(err: &ProtectionError) -> Self {
        Self::new(err.code(), err.to_string(), err.is_retryable())
    }
}
