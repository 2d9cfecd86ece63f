//! Shared protection context injected into host request handlers.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use common::ProtectionError;
use tracing::info;

use crate::config::{CipherConfig, TokenConfig};
use crate::crypto::PayloadCipher;
use crate::token::{HttpTokenEndpoint, SystemClock, TokenCache};

/// Process-scoped owner of the payload key and the cached bearer token.
///
/// Cheaply cloneable (`Arc`-backed) so a host can hand a copy to every request
/// handler. Either component may be absent when its configuration is not
/// supplied; calls into a missing component return
/// [`ProtectionError::Unavailable`].
#[derive(Clone, Debug, Default)]
pub struct ProtectionContext {
    cipher: Option<Arc<PayloadCipher>>,
    tokens: Option<TokenCache>,
}

impl ProtectionContext {
    /// Assemble a context from already-built components.
    pub fn new(cipher: Option<PayloadCipher>, tokens: Option<TokenCache>) -> Self {
        Self {
            cipher: cipher.map(Arc::new),
            tokens,
        }
    }

    /// Derive the payload key from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured secret is not usable key material.
    pub fn with_cipher_config(mut self, cfg: &CipherConfig) -> Result<Self> {
        let cipher = PayloadCipher::from_base64_secret(&cfg.payload_secret)
            .map_err(ProtectionError::from)
            .context("PAYLOAD_SECRET rejected")?;
        info!("payload key loaded");
        self.cipher = Some(Arc::new(cipher));
        Ok(self)
    }

    /// Build the HTTP token endpoint and an empty token cache from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn with_token_config(mut self, cfg: &TokenConfig) -> Result<Self> {
        let endpoint = HttpTokenEndpoint::new(
            cfg.url()?,
            cfg.client_id.clone(),
            cfg.client_secret.clone(),
            cfg.token_scope.clone(),
            cfg.request_timeout(),
        )
        .map_err(ProtectionError::from)
        .context("failed to build token endpoint client")?;

        info!(
            token_url = %cfg.token_url,
            refresh_skew_secs = cfg.token_refresh_skew_secs,
            "token cache configured"
        );
        self.tokens = Some(TokenCache::new(
            Arc::new(endpoint),
            Arc::new(SystemClock),
            cfg.refresh_skew(),
            cfg.request_timeout(),
        ));
        Ok(self)
    }

    /// Encrypt a payload with the process key.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ProtectionError> {
        Ok(self.cipher()?.encrypt(plaintext)?)
    }

    /// Decrypt a payload produced by [`ProtectionContext::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<String, ProtectionError> {
        Ok(self.cipher()?.decrypt(encoded)?)
    }

    /// Return a currently valid bearer token, refreshing it if needed.
    pub async fn bearer_token(&self) -> Result<String, ProtectionError> {
        let tokens = self
            .tokens
            .as_ref()
            .ok_or_else(|| ProtectionError::Unavailable("token cache not configured".into()))?;
        Ok(tokens.ensure_valid().await?)
    }

    /// The token cache, when configured.
    pub fn tokens(&self) -> Option<&TokenCache> {
        self.tokens.as_ref()
    }

    fn cipher(&self) -> Result<&PayloadCipher, ProtectionError> {
        self.cipher
            .as_deref()
            .ok_or_else(|| ProtectionError::Unavailable("payload cipher not configured".into()))
    }
}
