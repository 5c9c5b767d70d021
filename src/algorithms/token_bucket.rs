//! Token bucket rate limiting algorithm
//!
//! The bucket is a small JSON record refilled lazily on every check. It is
//! written back after every check, allowed or not, with an idle TTL so
//! buckets nobody uses any more disappear from the store. Two concurrent
//! checks may read the same token count and both spend from it; the
//! limiter tolerates that over-grant.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Algorithm, Quota, RateLimitAlgorithm, RateLimitUsage};
use crate::error::NskvResult;
use crate::namespace::Namespace;
use crate::response::RateLimitResult;
use crate::store::KeyspaceStore;

pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: f64,
    /// Epoch milliseconds of the last refill
    pub last_refill: u64,
}

impl BucketState {
    pub fn full(capacity: u64, now: u64) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    /// Adds the tokens earned since `last_refill`, capped at `capacity`.
    pub fn refill(&mut self, capacity: u64, refill_rate: f64, now: u64) {
        let elapsed_secs = now.saturating_sub(self.last_refill) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed_secs * refill_rate).min(capacity as f64);
        self.last_refill = now;
    }

    pub fn try_consume(&mut self, cost: f64) -> bool {
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

pub struct TokenBucketLimiter {
    ns: Namespace,
    idle_ttl: Duration,
}

impl TokenBucketLimiter {
    pub fn new(ns: Namespace) -> Self {
        Self {
            ns,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }
}

#[async_trait]
impl RateLimitAlgorithm for TokenBucketLimiter {
    async fn check(
        &self,
        identifier: &str,
        quota: &Quota,
        now: u64,
    ) -> NskvResult<RateLimitResult> {
        let key = Algorithm::TokenBucket.key(identifier);

        let mut bucket = self
            .ns
            .get_json::<BucketState>(&key)
            .await?
            .unwrap_or_else(|| BucketState::full(quota.capacity, now));
        bucket.refill(quota.capacity, quota.refill_rate, now);

        let cost = quota.cost as f64;
        let allowed = bucket.try_consume(cost);

        self.ns.set_json(&key, &bucket, Some(self.idle_ttl)).await?;

        let until_full = (quota.capacity as f64 - bucket.tokens).max(0.0) / quota.refill_rate;
        let reset_at = now + (until_full * 1000.0).ceil() as u64;

        debug!(identifier = %identifier, tokens = bucket.tokens, allowed, "token bucket check");

        if allowed {
            Ok(RateLimitResult::allowed(
                bucket.tokens.floor().max(0.0) as u64,
                quota.capacity,
                reset_at,
            ))
        } else {
            let retry_after = ((cost - bucket.tokens) / quota.refill_rate).ceil() as u64;
            Ok(RateLimitResult::denied(quota.capacity, reset_at, retry_after))
        }
    }

    async fn usage(&self, identifier: &str) -> NskvResult<Option<RateLimitUsage>> {
        let key = Algorithm::TokenBucket.key(identifier);
        let bucket = self.ns.get_json::<BucketState>(&key).await?;
        Ok(bucket.map(|b| RateLimitUsage::TokenBucket {
            tokens: b.tokens,
            last_refill: b.last_refill,
        }))
    }

    async fn reset(&self, identifier: &str) -> NskvResult<bool> {
        let key = Algorithm::TokenBucket.key(identifier);
        Ok(self.ns.del(&[&key]).await? > 0)
    }
}
