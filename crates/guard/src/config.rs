//! Configuration loading and validation.
//!
//! All values are read from environment variables at startup. Each component
//! has its own section so a process that only encrypts payloads does not need
//! authorization-server credentials, and vice versa.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;

use crate::token::{DEFAULT_REFRESH_SKEW, DEFAULT_REQUEST_TIMEOUT};

/// Payload encryption settings.
#[derive(Clone, Deserialize)]
pub struct CipherConfig {
    /// Base64 encoding of the 32-byte payload key. **Required.**
    pub payload_secret: String,
}

impl CipherConfig {
    /// Load and validate the cipher section from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PAYLOAD_SECRET` is absent or empty.
    pub fn from_env() -> Result<Self> {
        Self::from_source(env_source()?)
    }

    /// Load and validate the cipher section from an already-built source.
    pub fn from_source(source: config::Config) -> Result<Self> {
        let c: CipherConfig = source
            .try_deserialize()
            .context("failed to deserialise cipher configuration")?;
        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.payload_secret, "PAYLOAD_SECRET")
    }
}

impl std::fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherConfig")
            .field("payload_secret", &"[REDACTED]")
            .finish()
    }
}

/// Authorization-server settings for the token cache.
#[derive(Clone, Deserialize)]
pub struct TokenConfig {
    /// OAuth2 token endpoint URL. **Required.**
    pub token_url: String,

    /// Client identifier for the client-credentials grant. **Required.**
    pub client_id: String,

    /// Client secret for the client-credentials grant. **Required.**
    pub client_secret: String,

    /// Optional `scope` parameter sent with every token request.
    #[serde(default)]
    pub token_scope: Option<String>,

    /// Seconds before the stated expiry at which a token is treated as stale.
    #[serde(default = "default_refresh_skew")]
    pub token_refresh_skew_secs: u64,

    /// Upper bound (seconds) on a single token request.
    #[serde(default = "default_request_timeout")]
    pub token_request_timeout_secs: u64,
}

fn default_refresh_skew() -> u64 {
    DEFAULT_REFRESH_SKEW.as_secs()
}
fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl TokenConfig {
    /// Load and validate the token section from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_source(env_source()?)
    }

    /// Load and validate the token section from an already-built source.
    pub fn from_source(source: config::Config) -> Result<Self> {
        let c: TokenConfig = source
            .try_deserialize()
            .context("failed to deserialise token configuration")?;
        c.validate()?;
        Ok(c)
    }

    /// The parsed token endpoint URL.
    pub fn url(&self) -> Result<Url> {
        let url = Url::parse(&self.token_url).context("TOKEN_URL is not a valid URL")?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("TOKEN_URL must use http or https");
        }
        Ok(url)
    }

    pub fn refresh_skew(&self) -> Duration {
        Duration::from_secs(self.token_refresh_skew_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.token_request_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.token_url, "TOKEN_URL")?;
        ensure_non_empty(&self.client_id, "CLIENT_ID")?;
        ensure_non_empty(&self.client_secret, "CLIENT_SECRET")?;
        self.url()?;
        if self.token_request_timeout_secs == 0 {
            anyhow::bail!("TOKEN_REQUEST_TIMEOUT_SECS must be > 0");
        }
        Ok(())
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_scope", &self.token_scope)
            .field("token_refresh_skew_secs", &self.token_refresh_skew_secs)
            .field("token_request_timeout_secs", &self.token_request_timeout_secs)
            .finish()
    }
}

fn env_source() -> Result<config::Config> {
    config::Config::builder()
        .add_source(config::Environment::default())
        .build()
        .context("failed to build configuration from environment")
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
