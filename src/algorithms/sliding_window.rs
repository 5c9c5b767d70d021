//! Sliding window rate limiting algorithm
//!
//! Each admitted request is one sorted-set entry scored by its timestamp in
//! epoch milliseconds. A check first trims entries older than the window,
//! so the count is exact for any window position. Memory grows with the
//! limit, which is the price for having no boundary burst.

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{Algorithm, Quota, RateLimitAlgorithm, RateLimitUsage};
use crate::error::NskvResult;
use crate::namespace::Namespace;
use crate::response::RateLimitResult;
use crate::store::KeyspaceStore;

/// Sliding window rate limiter implementation
pub struct SlidingWindowLimiter {
    ns: Namespace,
}

impl SlidingWindowLimiter {
    /// Create a new sliding window rate limiter
    pub fn new(ns: Namespace) -> Self {
        Self { ns }
    }

    /// Score of the oldest entry still in the set
    async fn oldest(&self, key: &str) -> NskvResult<Option<u64>> {
        let first = self.ns.zrange(key, 0, 0).await?;
        Ok(first.first().map(|(_, score)| *score as u64))
    }
}

#[async_trait]
impl RateLimitAlgorithm for SlidingWindowLimiter {
    async fn check(
        &self,
        identifier: &str,
        quota: &Quota,
        now: u64,
    ) -> NskvResult<RateLimitResult> {
        let key = Algorithm::SlidingWindow.key(identifier);
        let window_ms = quota.window_millis();
        let window_start = now.saturating_sub(window_ms);

        // Remove expired timestamps: everything scored strictly below the window start
        self.ns
            .zrem_range_by_score(&key, f64::NEG_INFINITY, window_start as f64 - 1.0)
            .await?;

        let count = self.ns.zcard(&key).await?;
        let allowed = count < quota.max_requests;

        if allowed {
            let member = format!("{}-{}", now, Uuid::new_v4().simple());
            self.ns.zadd(&key, &[(now as f64, member.as_str())]).await?;
            // cleanup only, the trim above is what keeps the count exact
            self.ns.expire(&key, quota.window).await?;
        }

        let oldest = self.oldest(&key).await?.unwrap_or(now);
        let reset_at = oldest + window_ms;

        debug!(identifier = %identifier, count, allowed, limit = quota.max_requests, "sliding window check");

        if allowed {
            Ok(RateLimitResult::allowed(
                quota.max_requests.saturating_sub(count + 1),
                quota.max_requests,
                reset_at,
            ))
        } else {
            let wait_ms = reset_at.saturating_sub(now);
            Ok(RateLimitResult::denied(
                quota.max_requests,
                reset_at,
                wait_ms.div_ceil(1000),
            ))
        }
    }

    async fn usage(&self, identifier: &str) -> NskvResult<Option<RateLimitUsage>> {
        let key = Algorithm::SlidingWindow.key(identifier);
        let requests = self.ns.zcard(&key).await?;
        if requests == 0 {
            return Ok(None);
        }

        Ok(Some(RateLimitUsage::SlidingWindow {
            requests,
            oldest: self.oldest(&key).await?,
        }))
    }

    async fn reset(&self, identifier: &str) -> NskvResult<bool> {
        let key = Algorithm::SlidingWindow.key(identifier);
        Ok(self.ns.del(&[&key]).await? > 0)
    }
}
