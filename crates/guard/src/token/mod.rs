//! OAuth2 client-credentials token acquisition and caching.
//!
//! # Lifecycle
//!
//! 1. The cache starts empty; no request is made until a caller needs a token.
//! 2. [`TokenCache::ensure_valid`] returns the cached token while
//!    `now < expires_at - refresh_skew`.
//! 3. Otherwise the first caller requests a new token from the
//!    [`TokenEndpoint`]; concurrent callers wait for that request and reuse
//!    its result.
//! 4. A failed request leaves the previous credential in place. The cache never
//!    retries; the caller decides.
//!
//! # Security invariants
//!
//! - Bearer tokens and client secrets never appear in logs or `Debug` output.

pub mod cache;
pub mod clock;
pub mod endpoint;

pub use cache::{TokenCache, TokenState, DEFAULT_REFRESH_SKEW, DEFAULT_REQUEST_TIMEOUT};
pub use clock::{Clock, ManualClock, SystemClock};
pub use endpoint::{AuthServerError, HttpTokenEndpoint, TokenEndpoint};
