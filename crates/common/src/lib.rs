//! Common types, protocol definitions, and errors shared across `guard` crates.

pub mod error;
pub mod protocol;

pub use error::ProtectionError;
