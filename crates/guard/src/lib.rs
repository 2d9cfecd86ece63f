//! Payload encryption and bearer-token caching for the booking service.
//!
//! - [`crypto::PayloadCipher`] protects text values crossing the browser/server
//!   boundary with AES-256-GCM-SIV.
//! - [`token::TokenCache`] keeps an OAuth2 client-credentials token fresh for
//!   outbound travel-API calls.
//! - [`context::ProtectionContext`] bundles both for injection into a host.

pub mod config;
pub mod context;
pub mod crypto;
pub mod telemetry;
pub mod token;

pub use context::ProtectionContext;
