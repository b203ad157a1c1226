use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let tokens_to_add = elapsed * self.refill_rate;

        self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::from_secs(0)
        } else {
            let tokens_needed = 1.0 - self.tokens;
            let seconds = tokens_needed / self.refill_rate;
            Duration::from_secs_f64(seconds.max(0.0))
        }
    }
}

/// Outcome of a non-blocking acquire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Zero when allowed; otherwise the wait until the next token.
    pub retry_after: Duration,
    pub remaining: f64,
}

#[derive(Debug, Clone)]
struct BucketRule {
    prefix: String,
    rate: f64,
    capacity: f64,
}

/// Sharded rate limiter keyed by arbitrary strings.
///
/// Keys are typically `"{plugin}:{user}"` or a workload name. Uses multiple
/// shards (separate HashMaps) so that different keys usually lock different
/// shards. Rules registered with [`RateLimiter::with_rule`] override the default
/// rate for keys starting with a prefix; the longest matching prefix wins.
#[derive(Clone)]
pub struct RateLimiter {
    shards: Vec<Arc<Mutex<HashMap<String, TokenBucket>>>>,
    shard_count: usize,
    default_rate: f64,
    default_capacity: f64,
    rules: Arc<Vec<BucketRule>>,
}

impl RateLimiter {
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shard_count
    }

    fn initial_bucket(&self, key: &str) -> TokenBucket {
        let rule = self
            .rules
            .iter()
            .filter(|r| key.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len());
        match rule {
            Some(rule) => TokenBucket::new(rule.capacity, rule.rate),
            None => TokenBucket::new(self.default_capacity, self.default_rate),
        }
    }

    /// Create a rate limiter refilling `rate` tokens per second up to `capacity`
    /// (default 16 shards).
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self::with_shards(rate, capacity, 16)
    }

    /// Create a rate limiter with custom shard count for tuning under high load.
    pub fn with_shards(rate: f64, capacity: f64, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| Arc::new(Mutex::new(HashMap::new())))
            .collect();
        Self {
            shards,
            shard_count,
            default_rate: rate.max(f64::MIN_POSITIVE),
            default_capacity: capacity.max(1.0),
            rules: Arc::new(Vec::new()),
        }
    }

    /// Override rate and capacity for keys starting with `prefix`.
    ///
    /// Rules apply to buckets created afterwards; configure them before use.
    pub fn with_rule(mut self, prefix: impl Into<String>, rate: f64, capacity: f64) -> Self {
        let mut rules = (*self.rules).clone();
        rules.push(BucketRule {
            prefix: prefix.into(),
            rate: rate.max(f64::MIN_POSITIVE),
            capacity: capacity.max(1.0),
        });
        self.rules = Arc::new(rules);
        self
    }

    /// Acquire a token for the given key, blocking until available
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, key: &str) {
        loop {
            let wait_duration = {
                let shard = &self.shards[self.shard_index(key)];
                let mut buckets = shard.lock().await;
                let bucket = buckets
                    .entry(key.to_string())
                    .or_insert_with(|| self.initial_bucket(key));

                if bucket.try_acquire() {
                    tracing::trace!(
                        key = key,
                        tokens_remaining = bucket.tokens,
                        "Rate limit token acquired"
                    );
                    return;
                }

                bucket.time_until_next_token()
            };

            if wait_duration > Duration::from_secs(0) {
                tracing::debug!(
                    key = key,
                    wait_ms = wait_duration.as_millis() as u64,
                    "Rate limit reached, waiting for token"
                );
                tokio::time::sleep(wait_duration).await;
            }
        }
    }

    /// Try to acquire a token without blocking
    #[tracing::instrument(skip(self))]
    pub async fn try_acquire(&self, key: &str) -> RateDecision {
        let shard = &self.shards[self.shard_index(key)];
        let mut buckets = shard.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| self.initial_bucket(key));

        if bucket.try_acquire() {
            tracing::trace!(
                key = key,
                tokens_remaining = bucket.tokens,
                "Rate limit token acquired (non-blocking)"
            );
            RateDecision {
                allowed: true,
                retry_after: Duration::ZERO,
                remaining: bucket.tokens,
            }
        } else {
            let retry_after = bucket.time_until_next_token();
            tracing::debug!(
                key = key,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit token not available"
            );
            RateDecision {
                allowed: false,
                retry_after,
                remaining: bucket.tokens,
            }
        }
    }

    /// Get the current number of available tokens for a key
    pub async fn available_tokens(&self, key: &str) -> f64 {
        let shard = &self.shards[self.shard_index(key)];
        let mut buckets = shard.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| self.initial_bucket(key));

        bucket.refill();
        bucket.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(2.0, 4.0);

        limiter.acquire("ocr").await;
        limiter.acquire("ocr").await;

        let tokens = limiter.available_tokens("ocr").await;
        assert!(tokens < 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_refill() {
        let limiter = RateLimiter::new(10.0, 20.0);

        for _ in 0..5 {
            limiter.acquire("embed").await;
        }

        let tokens_before = limiter.available_tokens("embed").await;
        tokio::time::advance(Duration::from_millis(500)).await;
        let tokens_after = limiter.available_tokens("embed").await;

        assert!(tokens_after > tokens_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_reports_retry_after() {
        let limiter = RateLimiter::new(1.0, 2.0);

        assert!(limiter.try_acquire("gmail:alice").await.allowed);
        assert!(limiter.try_acquire("gmail:alice").await.allowed);

        let denied = limiter.try_acquire("gmail:alice").await;
        assert!(!denied.allowed);
        assert!(denied.retry_after > Duration::ZERO);
        assert!(denied.retry_after <= Duration::from_secs(1));

        // Other keys have their own bucket.
        assert!(limiter.try_acquire("gmail:bob").await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefix_rule_longest_match() {
        let limiter = RateLimiter::new(1.0, 1.0)
            .with_rule("plugin:", 5.0, 10.0)
            .with_rule("plugin:gmail:", 1.0, 3.0);

        assert_eq!(limiter.available_tokens("plugin:calendar:u1").await, 10.0);
        assert_eq!(limiter.available_tokens("plugin:gmail:u1").await, 3.0);
        assert_eq!(limiter.available_tokens("other").await, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_single_shard() {
        let limiter = RateLimiter::with_shards(2.0, 4.0, 1);

        limiter.acquire("a").await;
        limiter.acquire("b").await;

        assert!(limiter.available_tokens("a").await < 4.0);
        assert!(limiter.available_tokens("b").await < 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(10.0, 1.0);
        limiter.acquire("k").await;

        let start = Instant::now();
        limiter.acquire("k").await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
