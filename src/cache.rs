use async_trait::async_trait;
use dashmap::DashMap;
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::debug;

use crate::{error::Result, redis::RedisClient};

/// Fixed-window admission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of a single rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests still admitted in the current window
    pub remaining: u32,
    /// Time until the current window resets
    pub reset_after: Duration,
}

/// Storage for per-client request counters
#[async_trait]
pub trait RateLimitCache: Send + Sync {
    /// Count one request against `key` and decide whether it is admitted
    async fn hit(&self, key: &str) -> Result<RateLimitDecision>;

    /// Health check for the cache
    async fn health_check(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    reset_at: Instant,
}

/// Process-local rate limit cache.
///
/// Each hit runs under the map's entry guard for its key, so concurrent
/// requests from one client cannot both pass at the boundary count. The
/// table is not shared across processes.
///
/// Once more than `max_tracked_keys` buckets are held, expired buckets are
/// pruned, at most once per window.
pub struct LocalRateLimitCache {
    buckets: DashMap<String, Bucket>,
    policy: RateLimitPolicy,
    max_tracked_keys: usize,
    last_prune: Mutex<Option<Instant>>,
}

impl LocalRateLimitCache {
    pub fn new(policy: RateLimitPolicy, max_tracked_keys: usize) -> Self {
        Self {
            buckets: DashMap::new(),
            policy,
            max_tracked_keys,
            last_prune: Mutex::new(None),
        }
    }

    /// Number of buckets currently held
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Drop every bucket whose window ended before `now`
    pub fn prune_expired(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| now <= bucket.reset_at);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "Pruned expired rate limit buckets");
        }
        removed
    }

    fn hit_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let decision = {
            let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
                count: 0,
                reset_at: now + self.policy.window,
            });

            if bucket.count == 0 || now > bucket.reset_at {
                *bucket = Bucket {
                    count: 1,
                    reset_at: now + self.policy.window,
                };
                RateLimitDecision {
                    allowed: true,
                    remaining: self.policy.max_requests.saturating_sub(1),
                    reset_after: self.policy.window,
                }
            } else if bucket.count >= self.policy.max_requests {
                RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_after: bucket.reset_at.saturating_duration_since(now),
                }
            } else {
                bucket.count += 1;
                RateLimitDecision {
                    allowed: true,
                    remaining: self.policy.max_requests - bucket.count,
                    reset_after: bucket.reset_at.saturating_duration_since(now),
                }
            }
        };

        // The entry guard above must be released before touching the whole map.
        if self.buckets.len() > self.max_tracked_keys && self.prune_due(now) {
            self.prune_expired(now);
        }

        decision
    }

    /// Claim the prune slot if no prune ran within the last window
    fn prune_due(&self, now: Instant) -> bool {
        let mut last = self
            .last_prune
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match *last {
            Some(at) if now.saturating_duration_since(at) < self.policy.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[async_trait]
impl RateLimitCache for LocalRateLimitCache {
    async fn hit(&self, key: &str) -> Result<RateLimitDecision> {
        Ok(self.hit_at(key, Instant::now()))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Redis-backed rate limit cache shared by every instance of the service
pub struct RedisRateLimitCache {
    client: RedisClient,
    policy: RateLimitPolicy,
    key_prefix: String,
}

impl RedisRateLimitCache {
    pub fn new(client: RedisClient, policy: RateLimitPolicy, key_prefix: String) -> Self {
        Self {
            client,
            policy,
            key_prefix,
        }
    }

    fn cache_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }
}

/// Decision for a shared fixed-window counter that has already been
/// incremented. The counter keeps growing past the limit, so the request is
/// admitted only while the post-increment count is within the limit.
fn window_decision(count: u64, ttl: Duration, policy: &RateLimitPolicy) -> RateLimitDecision {
    let limit = u64::from(policy.max_requests);
    RateLimitDecision {
        allowed: count <= limit,
        remaining: limit.saturating_sub(count) as u32,
        reset_after: ttl,
    }
}

#[async_trait]
impl RateLimitCache for RedisRateLimitCache {
    async fn hit(&self, key: &str) -> Result<RateLimitDecision> {
        let cache_key = self.cache_key(key);
        let (count, ttl) = self
            .client
            .fixed_window_hit(&cache_key, self.policy.window)
            .await?;

        Ok(window_decision(count, ttl, &self.policy))
    }

    async fn health_check(&self) -> Result<()> {
        self.client.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy::default()
    }

    #[test]
    fn test_fifth_request_allowed_sixth_denied() {
        let cache = LocalRateLimitCache::new(policy(), 10_000);
        let now = Instant::now();

        for i in 0..5 {
            let decision = cache.hit_at("client", now);
            assert!(decision.allowed, "request {} should be allowed", i + 1);
            assert_eq!(decision.remaining, 4 - i);
        }

        let sixth = cache.hit_at("client", now);
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
        assert_eq!(sixth.reset_after, Duration::from_secs(60));
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let cache = LocalRateLimitCache::new(policy(), 10_000);
        let start = Instant::now();

        for _ in 0..6 {
            cache.hit_at("client", start);
        }
        assert!(!cache.hit_at("client", start + Duration::from_secs(59)).allowed);

        // Exactly at the reset time the window is still closed
        assert!(!cache.hit_at("client", start + Duration::from_secs(60)).allowed);

        let after = start + Duration::from_secs(61);
        let decision = cache.hit_at("client", after);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn test_denied_requests_do_not_extend_window() {
        let cache = LocalRateLimitCache::new(policy(), 10_000);
        let start = Instant::now();

        for _ in 0..5 {
            cache.hit_at("client", start);
        }
        let denied = cache.hit_at("client", start + Duration::from_secs(30));
        assert!(!denied.allowed);
        assert_eq!(denied.reset_after, Duration::from_secs(30));
    }

    #[test]
    fn test_keys_are_independent() {
        let cache = LocalRateLimitCache::new(policy(), 10_000);
        let now = Instant::now();

        for _ in 0..5 {
            assert!(cache.hit_at("a", now).allowed);
        }
        assert!(!cache.hit_at("a", now).allowed);
        assert!(cache.hit_at("b", now).allowed);
    }

    #[test]
    fn test_prune_removes_only_expired_buckets() {
        let cache = LocalRateLimitCache::new(policy(), 10_000);
        let start = Instant::now();

        cache.hit_at("old", start);
        cache.hit_at("fresh", start + Duration::from_secs(30));
        assert_eq!(cache.tracked_keys(), 2);

        let removed = cache.prune_expired(start + Duration::from_secs(61));
        assert_eq!(removed, 1);
        assert_eq!(cache.tracked_keys(), 1);
    }

    #[test]
    fn test_prune_triggered_by_threshold() {
        let cache = LocalRateLimitCache::new(policy(), 2);
        let start = Instant::now();

        cache.hit_at("a", start);
        cache.hit_at("b", start);
        let later = start + Duration::from_secs(120);
        cache.hit_at("c", later);

        // "a" and "b" expired and were pruned once the table passed two keys
        assert_eq!(cache.tracked_keys(), 1);
    }

    #[test]
    fn test_prune_runs_at_most_once_per_window() {
        let cache = LocalRateLimitCache::new(policy(), 2);
        let start = Instant::now();

        cache.hit_at("a", start);
        cache.hit_at("b", start);

        // Over the threshold, but nothing has expired yet
        cache.hit_at("c", start + Duration::from_secs(59));
        assert_eq!(cache.tracked_keys(), 3);

        // "a" and "b" have expired, but a prune already ran this window
        cache.hit_at("d", start + Duration::from_secs(61));
        assert_eq!(cache.tracked_keys(), 4);

        // A window after the last prune, the scan runs again
        cache.hit_at("e", start + Duration::from_secs(120));
        assert_eq!(cache.tracked_keys(), 2);
    }

    #[test]
    fn test_shared_window_admits_through_limit() {
        let ttl = Duration::from_secs(42);

        let fifth = window_decision(5, ttl, &policy());
        assert!(fifth.allowed);
        assert_eq!(fifth.remaining, 0);
        assert_eq!(fifth.reset_after, ttl);

        let first = window_decision(1, ttl, &policy());
        assert!(first.allowed);
        assert_eq!(first.remaining, 4);

        let sixth = window_decision(6, ttl, &policy());
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);

        assert!(!window_decision(1_000, ttl, &policy()).allowed);
    }

    #[tokio::test]
    async fn test_concurrent_hits_admit_exactly_limit() {
        let cache = Arc::new(LocalRateLimitCache::new(policy(), 10_000));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.hit("shared").await.unwrap().allowed })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
    }
}
