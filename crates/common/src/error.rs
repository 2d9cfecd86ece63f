//! Host-facing error taxonomy shared across crates.

use thiserror::Error;

/// Top-level protection-layer error type.
///
/// Variants map to HTTP status codes a host would return to its callers:
/// - [`ProtectionError::KeyMaterial`] → 503
/// - [`ProtectionError::Format`] → 400
/// - [`ProtectionError::Authentication`] → 422
/// - [`ProtectionError::AuthServer`] → 502
/// - [`ProtectionError::Unavailable`] → 503
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// The encryption key could not be derived from configuration.
    #[error("key material error: {0}")]
    KeyMaterial(String),

    /// The encoded ciphertext is malformed or truncated.
    #[error("malformed ciphertext: {0}")]
    Format(String),

    /// The ciphertext failed integrity verification.
    #[error("ciphertext failed authentication")]
    Authentication,

    /// The authorization server did not issue a token.
    #[error("authorization server error: {0}")]
    AuthServer(String),

    /// A component is not configured in this process.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ProtectionError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ProtectionError::KeyMaterial(_) => 503,
            ProtectionError::Format(_) => 400,
            ProtectionError::Authentication => 422,
            ProtectionError::AuthServer(_) => 502,
            ProtectionError::Unavailable(_) => 503,
        }
    }

    /// Short machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ProtectionError::KeyMaterial(_) => "key_material",
            ProtectionError::Format(_) => "bad_ciphertext",
            ProtectionError::Authentication => "ciphertext_rejected",
            ProtectionError::AuthServer(_) => "auth_server",
            ProtectionError::Unavailable(_) => "service_unavailable",
        }
    }

    /// Whether retrying the outer operation later can succeed.
    ///
    /// Cryptographic failures are never transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProtectionError::AuthServer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_codes() {
        assert_eq!(ProtectionError::KeyMaterial("x".into()).http_status(), 503);
        assert_eq!(ProtectionError::Format("x".into()).http_status(), 400);
        assert_eq!(ProtectionError::Authentication.http_status(), 422);
        assert_eq!(ProtectionError::AuthServer("x".into()).http_status(), 502);
        assert_eq!(ProtectionError::Unavailable("x".into()).http_status(), 503);
    }

    #[test]
    fn only_auth_server_errors_are_retryable() {
        assert!(ProtectionError::AuthServer("timeout".into()).is_retryable());
        assert!(!ProtectionError::Authentication.is_retryable());
        assert!(!ProtectionError::Format("short".into()).is_retryable());
        assert!(!ProtectionError::KeyMaterial("empty".into()).is_retryable());
    }

    #[test]
    fn display_includes_message() {
        let e = ProtectionError::Format("shorter than nonce".into());
        assert!(e.to_string().contains("shorter than nonce"));
    }
}
