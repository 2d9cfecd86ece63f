//! OAuth2 client-credentials calls to the authorization server.

use std::time::Duration;

use async_trait::async_trait;
use common::protocol::{OAuthErrorResponse, TokenResponse};
use common::ProtectionError;
use reqwest::Url;
use thiserror::Error;
use tracing::debug;

/// Errors produced while obtaining a token from the authorization server.
#[derive(Debug, Clone, Error)]
pub enum AuthServerError {
    /// The request never produced an HTTP response.
    #[error("token request failed: {0}")]
    Transport(String),

    /// No response within the configured request timeout.
    #[error("token request timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-2xx status.
    #[error("authorization server returned {status}{}", oauth_suffix(.error))]
    Status {
        status: u16,
        /// OAuth2 `error` code from the response body, when present.
        error: Option<String>,
    },

    /// A 2xx response whose body is not a usable token response.
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

fn oauth_suffix(error: &Option<String>) -> String {
    error
        .as_deref()
        .map(|code| format!(" ({code})"))
        .unwrap_or_default()
}

impl From<AuthServerError> for ProtectionError {
    fn from(err: AuthServerError) -> Self {
        ProtectionError::AuthServer(err.to_string())
    }
}

/// Something that can issue a client-credentials token.
///
/// Implementations perform exactly one request per call and never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn request_token(&self) -> Result<TokenResponse, AuthServerError>;
}

/// [`TokenEndpoint`] that POSTs a form-encoded client-credentials grant.
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    url: Url,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    timeout: Duration,
}

impl HttpTokenEndpoint {
    /// Build an endpoint client whose every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthServerError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        url: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AuthServerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthServerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope,
            timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> AuthServerError {
        if err.is_timeout() {
            AuthServerError::Timeout(self.timeout)
        } else {
            // Strip the URL so query parameters never leak into logs.
            AuthServerError::Transport(err.without_url().to_string())
        }
    }
}

impl std::fmt::Debug for HttpTokenEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenEndpoint")
            .field("url", &self.url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn request_token(&self) -> Result<TokenResponse, AuthServerError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .client
            .post(self.url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            // The body may echo request details; keep only the error code.
            let error = serde_json::from_slice::<OAuthErrorResponse>(&body)
                .ok()
                .map(|e| e.error);
            debug!(status = status.as_u16(), error = ?error, "token request rejected");
            return Err(AuthServerError::Status {
                status: status.as_u16(),
                error,
            });
        }

        serde_json::from_slice(&body).map_err(|e| AuthServerError::MalformedResponse(e.to_string()))
    }
}
