use crate::api::JobApi;
use crate::recorder::Recorder;
use crate::records::TokenSample;
use parking_lot::Mutex;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    issued_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    token: Option<CachedToken>,
    refreshes: u64,
    hits: u64,
}

/// Result of a `get_token` call. Cache hits carry zero latency and sizes.
#[derive(Debug, Clone)]
pub struct TokenOutcome {
    pub token: Option<String>,
    pub latency: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub success: bool,
    pub from_cache: bool,
    pub error: Option<String>,
}

impl TokenOutcome {
    fn cached(value: String) -> Self {
        Self {
            token: Some(value),
            latency: Duration::ZERO,
            bytes_sent: 0,
            bytes_received: 0,
            success: true,
            from_cache: true,
            error: None,
        }
    }
}

/// Single shared bearer token, refreshed once it is older than the TTL.
///
/// The lock covers the freshness check and the replacement, never the
/// network call. Workers that find the token expired at the same moment
/// each fetch their own; the last successful fetch wins.
pub struct TokenCache {
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub async fn get_token(&self, api: &dyn JobApi, recorder: &Recorder) -> TokenOutcome {
        {
            let mut state = self.state.lock();
            if let Some(cached) = state.token.clone() {
                if cached.issued_at.elapsed() < self.ttl {
                    state.hits += 1;
                    return TokenOutcome::cached(cached.value);
                }
            }
        }

        let start = Instant::now();
        let reply = api.request_token().await;
        let latency = start.elapsed();

        let (bytes_sent, bytes_received, parsed) = match reply {
            Ok(reply) => {
                let parsed = if reply.is_ok() {
                    serde_json::from_slice::<TokenResponse>(&reply.body)
                        .map(|r| r.access_token)
                        .map_err(|e| format!("invalid token response: {e}"))
                } else {
                    Err(format!("token endpoint returned HTTP {}", reply.status))
                };
                (reply.bytes_sent, reply.bytes_received, parsed)
            }
            Err(e) => (0, 0, Err(e.to_string())),
        };

        recorder.push_token(TokenSample {
            latency,
            bytes_sent,
            bytes_received,
            success: parsed.is_ok(),
            error: parsed.as_ref().err().cloned(),
        });

        match parsed {
            Ok(value) => {
                {
                    let mut state = self.state.lock();
                    state.token = Some(CachedToken {
                        value: value.clone(),
                        issued_at: Instant::now(),
                    });
                    state.refreshes += 1;
                }
                debug!(latency_ms = latency.as_millis() as u64, "Token refreshed");
                TokenOutcome {
                    token: Some(value),
                    latency,
                    bytes_sent,
                    bytes_received,
                    success: true,
                    from_cache: false,
                    error: None,
                }
            }
            Err(error) => {
                warn!("Token request failed: {}", error);
                TokenOutcome {
                    token: None,
                    latency,
                    bytes_sent,
                    bytes_received,
                    success: false,
                    from_cache: false,
                    error: Some(error),
                }
            }
        }
    }

    /// Number of successful network refreshes.
    pub fn refreshes(&self) -> u64 {
        self.state.lock().refreshes
    }

    pub fn hits(&self) -> u64 {
        self.state.lock().hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedApi};

    #[tokio::test(start_paused = true)]
    async fn test_ttl_hit_and_refresh() {
        let api = ScriptedApi::new().with_tokens(vec![
            Reply::json(200, r#"{"access_token":"first"}"#),
            Reply::json(200, r#"{"access_token":"second"}"#),
        ]);
        let recorder = Recorder::new();
        let cache = TokenCache::new(Duration::from_secs(20));

        let first = cache.get_token(&api, &recorder).await;
        assert!(first.success);
        assert!(!first.from_cache);
        assert_eq!(first.token.as_deref(), Some("first"));

        tokio::time::advance(Duration::from_secs(5)).await;
        let second = cache.get_token(&api, &recorder).await;
        assert!(second.from_cache);
        assert_eq!(second.latency, Duration::ZERO);
        assert_eq!(second.bytes_sent, 0);
        assert_eq!(second.token.as_deref(), Some("first"));
        assert_eq!(api.token_calls(), 1);

        tokio::time::advance(Duration::from_secs(20)).await;
        let third = cache.get_token(&api, &recorder).await;
        assert!(!third.from_cache);
        assert_eq!(third.token.as_deref(), Some("second"));
        assert_eq!(api.token_calls(), 2);

        assert_eq!(cache.refreshes(), 2);
        assert_eq!(cache.hits(), 1);
        assert_eq!(recorder.snapshot().tokens.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_cache_untouched() {
        let api = ScriptedApi::new().with_tokens(vec![
            Reply::json(200, r#"{"access_token":"good"}"#),
            Reply::json(500, "oops"),
            Reply::timeout(),
        ]);
        let recorder = Recorder::new();
        let cache = TokenCache::new(Duration::from_secs(1));

        assert!(cache.get_token(&api, &recorder).await.success);
        tokio::time::advance(Duration::from_secs(2)).await;

        let failed = cache.get_token(&api, &recorder).await;
        assert!(!failed.success);
        assert!(failed.token.is_none());
        assert!(failed.error.unwrap().contains("HTTP 500"));

        let timed_out = cache.get_token(&api, &recorder).await;
        assert!(!timed_out.success);
        assert!(timed_out.error.unwrap().contains("timed out"));

        assert_eq!(cache.refreshes(), 1);
        let tokens = recorder.snapshot().tokens;
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens.iter().filter(|t| t.success).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_each_refresh_expired_token() {
        let api = ScriptedApi::new();
        let recorder = Recorder::new();
        let cache = TokenCache::new(Duration::from_secs(20));

        let (a, b) = tokio::join!(
            cache.get_token(&api, &recorder),
            cache.get_token(&api, &recorder)
        );
        assert!(a.success && b.success);
        assert!(!a.from_cache);
        assert!(!b.from_cache);
        assert_eq!(api.token_calls(), 2);
        assert_eq!(cache.refreshes(), 2);

        tokio::time::advance(Duration::from_secs(21)).await;
        let (c, d) = tokio::join!(
            cache.get_token(&api, &recorder),
            cache.get_token(&api, &recorder)
        );
        assert!(!c.from_cache);
        assert!(!d.from_cache);
        assert_eq!(api.token_calls(), 4);
        assert_eq!(cache.refreshes(), 4);
        assert_eq!(cache.hits(), 0);
        assert_eq!(recorder.snapshot().tokens.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_token_body() {
        let api = ScriptedApi::new().with_tokens(vec![Reply::json(200, r#"{"token":"x"}"#)]);
        let recorder = Recorder::new();
        let cache = TokenCache::new(Duration::from_secs(20));

        let outcome = cache.get_token(&api, &recorder).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("invalid token response"));
        assert_eq!(cache.refreshes(), 0);
    }
}
