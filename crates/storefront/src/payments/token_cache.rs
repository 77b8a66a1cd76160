//! Cached bearer token for gateway APIs that use OAuth client credentials.
//!
//! The cache owns exactly one `{value, expires_at}` pair. Callers ask for a
//! token through [`TokenCache::get_or_refresh`], passing the function that
//! fetches a fresh one; the refresh runs at most once per expiry even under
//! concurrent callers, because the lock is held while it runs.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens are treated as expired this long before their real expiry.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// A token together with its lifetime, as returned by a token endpoint.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: SecretString,
    /// Lifetime in seconds from issue.
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::seconds(EXPIRY_BUFFER_SECS)
    }
}

/// Single-slot token cache.
#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token, or fetch and cache a new one if it is
    /// missing or about to expire.
    ///
    /// # Errors
    ///
    /// Propagates the refresh function's error. Nothing is cached on failure.
    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<SecretString, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IssuedToken, E>>,
    {
        let mut slot = self.slot.lock().await;
        let now = Utc::now();

        if let Some(cached) = slot.as_ref().filter(|t| !t.is_expired(now)) {
            return Ok(cached.value.clone());
        }

        let issued = refresh().await?;
        debug!(expires_in = issued.expires_in, "Refreshed gateway access token");
        *slot = Some(CachedToken {
            value: issued.value.clone(),
            expires_at: now + Duration::seconds(issued.expires_in),
        });
        Ok(issued.value)
    }

    /// Drop the cached token, e.g. after the gateway rejected it.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use secrecy::ExposeSecret;

    use super::*;

    async fn fetch(calls: &AtomicUsize, expires_in: i64) -> Result<IssuedToken, String> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Ok(IssuedToken {
            value: SecretString::from(format!("token-{n}")),
            expires_in,
        })
    }

    #[tokio::test]
    async fn test_reuses_valid_token() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        let first = cache.get_or_refresh(|| fetch(&calls, 3600)).await.unwrap();
        let second = cache.get_or_refresh(|| fetch(&calls, 3600)).await.unwrap();

        assert_eq!(first.expose_secret(), "token-0");
        assert_eq!(second.expose_secret(), "token-0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refreshes_inside_expiry_buffer() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        // Lifetime shorter than the buffer: expired as soon as it is cached.
        cache.get_or_refresh(|| fetch(&calls, 30)).await.unwrap();
        let second = cache.get_or_refresh(|| fetch(&calls, 30)).await.unwrap();

        assert_eq!(second.expose_secret(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        cache.get_or_refresh(|| fetch(&calls, 3600)).await.unwrap();
        cache.invalidate().await;
        cache.get_or_refresh(|| fetch(&calls, 3600)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_caches_nothing() {
        let cache = TokenCache::new();
        let failed: Result<SecretString, String> = cache
            .get_or_refresh(|| async { Err("unreachable".to_string()) })
            .await;
        assert!(failed.is_err());

        let calls = AtomicUsize::new(0);
        cache.get_or_refresh(|| fetch(&calls, 3600)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
