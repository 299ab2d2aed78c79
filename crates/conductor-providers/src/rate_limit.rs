use crate::config::RateLimitSettings;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Bucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

/// Token bucket rate limiter per provider.
///
/// Providers without a configured limit are never throttled.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// A limiter with no limits registered.
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Register a limit for a provider. The bucket starts full.
    pub fn with_limit(mut self, provider: &str, settings: RateLimitSettings) -> Self {
        let refill_rate = settings.requests_per_minute.max(0.0) / 60.0;
        let max_tokens = settings
            .burst
            .unwrap_or(settings.requests_per_minute)
            .max(1.0);
        self.buckets.get_mut().insert(
            provider.to_string(),
            Bucket {
                tokens: max_tokens,
                max_tokens,
                refill_rate,
                last_refill: Instant::now(),
            },
        );
        self
    }

    /// Try to consume one token for the given provider.
    /// Returns `true` if allowed, `false` if rate limited.
    pub async fn check(&self, provider: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let Some(bucket) = buckets.get_mut(provider) else {
            return true;
        };

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * bucket.refill_rate).min(bucket.max_tokens);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the provider's bucket holds a full token again.
    pub async fn retry_after(&self, provider: &str) -> Option<Duration> {
        let buckets = self.buckets.lock().await;
        let bucket = buckets.get(provider)?;
        if bucket.tokens >= 1.0 || bucket.refill_rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            (1.0 - bucket.tokens) / bucket.refill_rate,
        ))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
