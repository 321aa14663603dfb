use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    cache::{RateLimitCache, RateLimitDecision, RateLimitPolicy},
    error::Result,
    metrics::Metrics,
};

/// Per-client rate limiter in front of the signup endpoint.
///
/// Built once per process and shared by every request handler. Backend
/// failures fail open: the request is admitted and the error counted.
pub struct RateLimiter {
    cache: Box<dyn RateLimitCache>,
    policy: RateLimitPolicy,
    metrics: Arc<Metrics>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given cache implementation
    pub fn new(cache: Box<dyn RateLimitCache>, policy: RateLimitPolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            cache,
            policy,
            metrics,
        }
    }

    /// Count a request for `key` and report whether it is admitted
    pub async fn check(&self, key: &str) -> bool {
        self.check_detailed(key).await.allowed
    }

    /// Count a request for `key`, returning the full decision
    pub async fn check_detailed(&self, key: &str) -> RateLimitDecision {
        match self.cache.hit(key).await {
            Ok(decision) => {
                if decision.allowed {
                    debug!(client = %key, remaining = decision.remaining, "Rate limit check passed");
                } else {
                    self.metrics.record_rate_limited();
                    warn!(client = %key, "Rate limit exceeded");
                }
                decision
            }
            Err(e) => {
                self.metrics.record_rate_limit_backend_error();
                warn!(client = %key, error = %e, "Rate limit backend failed, admitting request");
                RateLimitDecision {
                    allowed: true,
                    remaining: self.policy.max_requests,
                    reset_after: self.policy.window,
                }
            }
        }
    }

    /// Health check for the limiter
    pub async fn health_check(&self) -> Result<()> {
        self.cache.health_check().await
    }
}
