//! [`EncryptionKey`]: the process-wide payload key, derived once from configuration.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use zeroize::Zeroize;

use super::cipher::CipherError;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// Owned by [`PayloadCipher`](super::PayloadCipher). Not `Clone`: there is one
/// copy per cipher and it is zeroed when dropped.
pub struct EncryptionKey(Box<[u8; KEY_LEN]>);

impl EncryptionKey {
    /// Import raw secret bytes as an AES-256 key.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::KeyMaterial`] if the secret is empty, is not
    /// exactly [`KEY_LEN`] bytes, or has every byte identical.
    pub fn from_secret(secret: &[u8]) -> Result<Self, CipherError> {
        if secret.is_empty() {
            return Err(CipherError::KeyMaterial("secret is empty".into()));
        }
        if secret.len() != KEY_LEN {
            return Err(CipherError::KeyMaterial(format!(
                "expected {KEY_LEN} bytes, got {}",
                secret.len()
            )));
        }
        if secret.iter().all(|b| *b == secret[0]) {
            return Err(CipherError::KeyMaterial(
                "secret has no entropy (all bytes identical)".into(),
            ));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(secret);
        Ok(Self(buf))
    }

    /// Decode a base64 secret (standard or URL-safe alphabet) and import it.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::KeyMaterial`] if the text is not valid base64 or
    /// the decoded bytes are rejected by [`EncryptionKey::from_secret`].
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Err(CipherError::KeyMaterial("secret is empty".into()));
        }
        let mut bytes = STANDARD
            .decode(trimmed)
            .or_else(|_| URL_SAFE.decode(trimmed))
            .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
            .map_err(|_| CipherError::KeyMaterial("secret is not valid base64".into()))?;
        let key = Self::from_secret(&bytes);
        bytes.zeroize();
        key
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material, not even in debug builds.
        f.write_str("EncryptionKey([REDACTED])")
    }
}
