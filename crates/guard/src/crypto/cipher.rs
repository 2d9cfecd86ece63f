//! AES-256-GCM-SIV encryption and decryption of text payloads.
//!
//! Every call draws a fresh 96-bit nonce from the OS CSPRNG, so encrypting the
//! same plaintext twice yields two different blobs. GCM-SIV additionally keeps
//! confidentiality intact should a nonce ever repeat.

use aes_gcm_siv::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256GcmSiv, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::ProtectionError;
use thiserror::Error;

use super::key::EncryptionKey;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The configured secret cannot be used as an AES-256 key.
    #[error("invalid key material: {0}")]
    KeyMaterial(String),

    /// The encoded value is not valid base64url, is too short to hold a nonce,
    /// or authenticated to bytes that are not UTF-8.
    #[error("invalid ciphertext format: {0}")]
    Format(&'static str),

    /// The authentication tag did not verify (tampered data or wrong key).
    #[error("ciphertext failed authentication")]
    Authentication,

    /// The plaintext exceeds the AEAD's maximum message length.
    #[error("plaintext too large to encrypt")]
    PlaintextTooLarge,
}

impl From<CipherError> for ProtectionError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::KeyMaterial(reason) => ProtectionError::KeyMaterial(reason),
            CipherError::Format(reason) => ProtectionError::Format(reason.into()),
            CipherError::Authentication => ProtectionError::Authentication,
            CipherError::PlaintextTooLarge => {
                ProtectionError::Format("plaintext too large to encrypt".into())
            }
        }
    }
}

/// Keyed AEAD helper producing `base64url(nonce || ciphertext+tag)` strings.
///
/// Stateless apart from the immutable key; share it behind an `Arc` and call
/// it from any number of tasks.
#[derive(Debug)]
pub struct PayloadCipher {
    key: EncryptionKey,
}

impl PayloadCipher {
    /// Wrap an already-derived key.
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Derive the key from a base64 configuration secret and build the cipher.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::KeyMaterial`] if the secret is unusable.
    pub fn from_base64_secret(secret: &str) -> Result<Self, CipherError> {
        EncryptionKey::from_base64(secret).map(Self::new)
    }

    /// Encrypt `plaintext` into a text-safe encoded blob.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::PlaintextTooLarge`] if the AEAD refuses the input.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let cipher = self.build_cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::PlaintextTooLarge)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    /// Decrypt a blob produced by [`PayloadCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Format`] if `encoded` is not valid base64url or
    /// decodes to fewer than [`NONCE_LEN`] bytes, and
    /// [`CipherError::Authentication`] if the tag does not verify.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let blob = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| CipherError::Format("not valid base64url"))?;
        if blob.len() < NONCE_LEN {
            return Err(CipherError::Format("shorter than the nonce"));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

        let cipher = self.build_cipher()?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Format("plaintext is not UTF-8"))
    }

    fn build_cipher(&self) -> Result<Aes256GcmSiv, CipherError> {
        Aes256GcmSiv::new_from_slice(self.key.as_bytes())
            .map_err(|_| CipherError::KeyMaterial("key rejected by AES-256-GCM-SIV".into()))
    }
}
