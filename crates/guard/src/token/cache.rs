//! [`TokenCache`]: single-flight cache for the client-credentials bearer token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::endpoint::{AuthServerError, TokenEndpoint};

/// Default safety margin before the stated expiry at which a token is renewed.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(60);

/// Default bound on a single authorization-server call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A bearer token and the instant it stops being accepted.
///
/// Always replaced as a whole; never mutated in place.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct CachedCredential {
    token: String,
    expires_at_epoch_millis: i64,
}

impl CachedCredential {
    fn is_fresh(&self, now_millis: i64, skew: Duration) -> bool {
        now_millis < self.expires_at_epoch_millis.saturating_sub(millis(skew))
    }
}

impl std::fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCredential")
            .field("token", &"[REDACTED]")
            .field("expires_at_epoch_millis", &self.expires_at_epoch_millis)
            .finish()
    }
}

/// Observable state of the cached credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No token has been obtained yet.
    Empty,
    /// A token is held and is outside the refresh window.
    Valid,
    /// A token is held but is within `refresh_skew` of (or past) its expiry.
    Stale,
}

struct Inner {
    endpoint: Arc<dyn TokenEndpoint>,
    clock: Arc<dyn Clock>,
    refresh_skew: Duration,
    request_timeout: Duration,
    credential: ArcSwapOption<CachedCredential>,
    /// Completed refresh attempts. Bumped while `refresh_lock` is held.
    attempts: AtomicU64,
    /// Held for the duration of a refresh so only one request is in flight.
    /// Guards the outcome of the most recent attempt.
    refresh_lock: Mutex<Option<Result<String, AuthServerError>>>,
}

/// Shared cache for the bearer token used on outbound API calls.
///
/// Reads go through [`ArcSwapOption`] and never block. A refresh runs under an
/// async mutex; callers that find the token stale while a refresh is in flight
/// wait for it and share its outcome, success or failure, instead of issuing
/// their own request.
#[derive(Clone)]
pub struct TokenCache {
    inner: Arc<Inner>,
}

impl TokenCache {
    /// Create an empty cache.
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        clock: Arc<dyn Clock>,
        refresh_skew: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint,
                clock,
                refresh_skew,
                request_timeout,
                credential: ArcSwapOption::empty(),
                attempts: AtomicU64::new(0),
                refresh_lock: Mutex::new(None),
            }),
        }
    }

    /// Return a token that is valid for at least `refresh_skew`, requesting a
    /// new one from the authorization server when needed.
    ///
    /// A token whose lifetime is shorter than the skew is still returned to
    /// the caller that fetched it; the next call will refresh again.
    ///
    /// Callers that queue behind an in-flight refresh receive that refresh's
    /// outcome. A failed refresh is never repeated for them; only a call that
    /// arrives after it completed starts a new attempt.
    ///
    /// # Errors
    ///
    /// Returns [`AuthServerError`] when a refresh was attempted and failed. The
    /// previously cached credential, if any, is left untouched.
    pub async fn ensure_valid(&self) -> Result<String, AuthServerError> {
        let seen = self.inner.attempts.load(Ordering::Acquire);
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let mut last = self.inner.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh_token() {
            debug!("token refreshed by concurrent caller");
            return Ok(token);
        }
        if self.inner.attempts.load(Ordering::Acquire) != seen {
            if let Some(outcome) = last.as_ref() {
                debug!("reusing outcome of concurrent refresh");
                return outcome.clone();
            }
        }

        let outcome = self.refresh().await;
        *last = Some(outcome.clone());
        self.inner.attempts.fetch_add(1, Ordering::Release);
        outcome
    }

    /// Current state of the cached credential.
    pub fn state(&self) -> TokenState {
        match self.inner.credential.load_full() {
            None => TokenState::Empty,
            Some(cred) if cred.is_fresh(self.now(), self.inner.refresh_skew) => TokenState::Valid,
            Some(_) => TokenState::Stale,
        }
    }

    /// The last token obtained, regardless of freshness.
    ///
    /// Lets a caller decide to keep using a stale token after a failed refresh.
    pub fn cached_token(&self) -> Option<String> {
        self.inner
            .credential
            .load_full()
            .map(|cred| cred.token.clone())
    }

    fn fresh_token(&self) -> Option<String> {
        let cred = self.inner.credential.load_full()?;
        cred.is_fresh(self.now(), self.inner.refresh_skew)
            .then(|| cred.token.clone())
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    /// Call the endpoint and swap in the new credential. Caller holds `refresh_lock`.
    async fn refresh(&self) -> Result<String, AuthServerError> {
        let issued_at = self.now();
        debug!(state = ?self.state(), "requesting new access token");

        let response = match tokio::time::timeout(
            self.inner.request_timeout,
            self.inner.endpoint.request_token(),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "token refresh failed; retaining previous credential");
                return Err(e);
            }
            Err(_) => {
                let e = AuthServerError::Timeout(self.inner.request_timeout);
                warn!(error = %e, "token refresh failed; retaining previous credential");
                return Err(e);
            }
        };

        if response.access_token.trim().is_empty() {
            let e = AuthServerError::MalformedResponse("access_token is empty".into());
            warn!(error = %e, "token refresh failed; retaining previous credential");
            return Err(e);
        }

        let lifetime_millis = i64::try_from(response.expires_in)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let credential = CachedCredential {
            token: response.access_token,
            expires_at_epoch_millis: issued_at.saturating_add(lifetime_millis),
        };

        if Duration::from_secs(response.expires_in) <= self.inner.refresh_skew {
            warn!(
                expires_in = response.expires_in,
                refresh_skew_secs = self.inner.refresh_skew.as_secs(),
                "token lifetime is within the refresh skew; cache is stale on arrival"
            );
        } else {
            info!(expires_in = response.expires_in, "access token refreshed");
        }

        let token = credential.token.clone();
        self.inner.credential.store(Some(Arc::new(credential)));
        Ok(token)
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("state", &self.state())
            .field("refresh_skew", &self.inner.refresh_skew)
            .field("request_timeout", &self.inner.request_timeout)
            .finish()
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::clock::ManualClock;
    use crate::token::endpoint::MockTokenEndpoint;
    use async_trait::async_trait;
    use common::protocol::TokenResponse;
    use std::sync::atomic::AtomicUsize;

    const T0: i64 = 1_700_000_000_000;

    fn token(access: &str, expires_in: u64) -> TokenResponse {
        TokenResponse {
            access_token: access.into(),
            expires_in,
            token_type: Some("Bearer".into()),
            scope: None,
        }
    }

    fn cache_with(endpoint: impl TokenEndpoint + 'static, clock: Arc<ManualClock>) -> TokenCache {
        TokenCache::new(
            Arc::new(endpoint),
            clock,
            DEFAULT_REFRESH_SKEW,
            Duration::from_secs(2),
        )
    }

    /// Endpoint that hands out numbered tokens after a delay.
    struct SlowEndpoint {
        calls: AtomicUsize,
        delay: Duration,
        expires_in: u64,
    }

    impl SlowEndpoint {
        fn new(delay: Duration, expires_in: u64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                expires_in,
            }
        }
    }

    #[async_trait]
    impl TokenEndpoint for SlowEndpoint {
        async fn request_token(&self) -> Result<TokenResponse, AuthServerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            Ok(token(&format!("token-{n}"), self.expires_in))
        }
    }

    /// Endpoint that rejects every request after a delay.
    struct FailingEndpoint {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl TokenEndpoint for FailingEndpoint {
        async fn request_token(&self) -> Result<TokenResponse, AuthServerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Err(AuthServerError::Status {
                status: 500,
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn starts_empty() {
        let cache = cache_with(MockTokenEndpoint::new(), Arc::new(ManualClock::new(T0)));
        assert_eq!(cache.state(), TokenState::Empty);
        assert!(cache.cached_token().is_none());
    }

    #[tokio::test]
    async fn first_call_fetches_and_caches() {
        let mut endpoint = MockTokenEndpoint::new();
        endpoint
            .expect_request_token()
            .times(1)
            .returning(|| Ok(token("abc", 3600)));
        let cache = cache_with(endpoint, Arc::new(ManualClock::new(T0)));

        assert_eq!(cache.ensure_valid().await.unwrap(), "abc");
        assert_eq!(cache.state(), TokenState::Valid);
        // Second call is served from the cache; the mock panics on a second request.
        assert_eq!(cache.ensure_valid().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn stays_valid_until_skew_window() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut endpoint = MockTokenEndpoint::new();
        let mut seq = mockall::Sequence::new();
        endpoint
            .expect_request_token()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(token("first", 3600)));
        endpoint
            .expect_request_token()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(token("second", 3600)));
        let cache = cache_with(endpoint, clock.clone());

        assert_eq!(cache.ensure_valid().await.unwrap(), "first");

        clock.advance(Duration::from_secs(3599 - 60));
        assert_eq!(cache.state(), TokenState::Valid);
        assert_eq!(cache.ensure_valid().await.unwrap(), "first");

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.state(), TokenState::Stale);
        assert_eq!(cache.ensure_valid().await.unwrap(), "second");
        assert_eq!(cache.state(), TokenState::Valid);
    }

    #[tokio::test]
    async fn boundary_is_stale() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut endpoint = MockTokenEndpoint::new();
        endpoint
            .expect_request_token()
            .times(1)
            .returning(|| Ok(token("abc", 3600)));
        let cache = cache_with(endpoint, clock.clone());
        cache.ensure_valid().await.unwrap();

        clock.advance(Duration::from_secs(3600 - 60));
        assert_eq!(cache.state(), TokenState::Stale);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_token() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut endpoint = MockTokenEndpoint::new();
        let mut seq = mockall::Sequence::new();
        endpoint
            .expect_request_token()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(token("original", 3600)));
        endpoint
            .expect_request_token()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Err(AuthServerError::Status {
                    status: 500,
                    error: None,
                })
            });
        let cache = cache_with(endpoint, clock.clone());
        cache.ensure_valid().await.unwrap();

        clock.advance(Duration::from_secs(3590));
        let err = cache.ensure_valid().await.unwrap_err();
        assert!(matches!(err, AuthServerError::Status { status: 500, .. }));
        assert_eq!(cache.state(), TokenState::Stale);
        assert_eq!(cache.cached_token().as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn failure_from_empty_stays_empty() {
        let mut endpoint = MockTokenEndpoint::new();
        endpoint
            .expect_request_token()
            .times(1)
            .returning(|| Err(AuthServerError::Transport("connection refused".into())));
        let cache = cache_with(endpoint, Arc::new(ManualClock::new(T0)));

        assert!(matches!(
            cache.ensure_valid().await,
            Err(AuthServerError::Transport(_))
        ));
        assert_eq!(cache.state(), TokenState::Empty);
    }

    #[tokio::test]
    async fn empty_access_token_is_malformed() {
        let mut endpoint = MockTokenEndpoint::new();
        endpoint
            .expect_request_token()
            .times(1)
            .returning(|| Ok(token("  ", 3600)));
        let cache = cache_with(endpoint, Arc::new(ManualClock::new(T0)));

        assert!(matches!(
            cache.ensure_valid().await,
            Err(AuthServerError::MalformedResponse(_))
        ));
        assert_eq!(cache.state(), TokenState::Empty);
    }

    #[tokio::test]
    async fn short_lived_token_is_returned_but_stale() {
        let mut endpoint = MockTokenEndpoint::new();
        let mut seq = mockall::Sequence::new();
        endpoint
            .expect_request_token()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(token("brief", 30)));
        endpoint
            .expect_request_token()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(token("longer", 3600)));
        let cache = cache_with(endpoint, Arc::new(ManualClock::new(T0)));

        assert_eq!(cache.ensure_valid().await.unwrap(), "brief");
        assert_eq!(cache.state(), TokenState::Stale);
        assert_eq!(cache.ensure_valid().await.unwrap(), "longer");
    }

    #[tokio::test]
    async fn slow_endpoint_times_out_without_touching_cache() {
        let endpoint = SlowEndpoint::new(Duration::from_millis(500), 3600);
        let cache = TokenCache::new(
            Arc::new(endpoint),
            Arc::new(ManualClock::new(T0)),
            DEFAULT_REFRESH_SKEW,
            Duration::from_millis(50),
        );

        let err = cache.ensure_valid().await.unwrap_err();
        assert!(matches!(err, AuthServerError::Timeout(_)));
        assert_eq!(cache.state(), TokenState::Empty);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let endpoint = Arc::new(SlowEndpoint::new(Duration::from_millis(100), 3600));
        let cache = TokenCache::new(
            endpoint.clone(),
            Arc::new(ManualClock::new(T0)),
            DEFAULT_REFRESH_SKEW,
            Duration::from_secs(2),
        );

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.ensure_valid().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state(), TokenState::Valid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refresh_from_stale_stores_server_expiry() {
        let clock = Arc::new(ManualClock::new(T0));
        let endpoint = Arc::new(SlowEndpoint::new(Duration::from_millis(50), 3600));
        let cache = TokenCache::new(
            endpoint.clone(),
            clock.clone(),
            DEFAULT_REFRESH_SKEW,
            Duration::from_secs(2),
        );
        cache.ensure_valid().await.unwrap();

        clock.advance(Duration::from_secs(3600));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.ensure_valid().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-2");
        }

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
        let stored = cache.inner.credential.load_full().unwrap();
        assert_eq!(
            stored.expires_at_epoch_millis,
            T0 + 3600 * 1000 + 3600 * 1000
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiters_share_a_failed_refresh() {
        let request_timeout = Duration::from_millis(300);
        let endpoint = Arc::new(FailingEndpoint {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let cache = TokenCache::new(
            endpoint.clone(),
            Arc::new(ManualClock::new(T0)),
            DEFAULT_REFRESH_SKEW,
            request_timeout,
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let started = tokio::time::Instant::now();
                    let result = cache.ensure_valid().await;
                    (result, started.elapsed())
                })
            })
            .collect();

        for handle in handles {
            let (result, waited) = handle.await.unwrap();
            assert!(matches!(
                result,
                Err(AuthServerError::Status { status: 500, .. })
            ));
            assert!(waited < request_timeout * 2, "caller waited {waited:?}");
        }
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state(), TokenState::Empty);

        // A caller arriving after the failure makes a fresh attempt.
        assert!(cache.ensure_valid().await.is_err());
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiters_share_a_short_lived_token() {
        let endpoint = Arc::new(SlowEndpoint::new(Duration::from_millis(100), 30));
        let cache = TokenCache::new(
            endpoint.clone(),
            Arc::new(ManualClock::new(T0)),
            DEFAULT_REFRESH_SKEW,
            Duration::from_secs(2),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.ensure_valid().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state(), TokenState::Stale);
    }

    #[test]
    fn credential_debug_hides_token() {
        let cred = CachedCredential {
            token: "bearer-xyz".into(),
            expires_at_epoch_millis: T0,
        };
        assert!(!format!("{cred:?}").contains("bearer-xyz"));
    }
}
