//! AES-256-GCM-SIV payload encryption.
//!
//! This module is free of HTTP and token dependencies. It turns text into a
//! tamper-evident, confidential string and back using one process-wide key.
//!
//! # Ciphertext format
//!
//! ```text
//! base64url-no-pad( nonce[12] || ciphertext || tag[16] )
//! ```
//!
//! # Security invariants
//!
//! - The key is never logged, serialised, or printed via `Debug`.
//! - A nonce is drawn from the OS CSPRNG on every encryption.
//! - A blob that fails tag verification is rejected whole; there is no partial
//!   recovery.

pub mod cipher;
pub mod key;

pub use cipher::{CipherError, PayloadCipher, NONCE_LEN};
pub use key::{EncryptionKey, KEY_LEN};
