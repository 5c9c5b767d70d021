//! Fixed window rate limiting algorithm
//!
//! One counter per identifier. The first request of a window creates the
//! counter and gives it a TTL of one window; the store's expiry then ends
//! the window. Bursts straddling a window boundary can admit up to twice
//! the limit in a short span, which is inherent to the algorithm.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Algorithm, Quota, RateLimitAlgorithm, RateLimitUsage};
use crate::error::NskvResult;
use crate::namespace::Namespace;
use crate::response::RateLimitResult;
use crate::store::KeyspaceStore;

pub struct FixedWindowLimiter {
    ns: Namespace,
}

impl FixedWindowLimiter {
    pub fn new(ns: Namespace) -> Self {
        Self { ns }
    }
}

#[async_trait]
impl RateLimitAlgorithm for FixedWindowLimiter {
    async fn check(
        &self,
        identifier: &str,
        quota: &Quota,
        now: u64,
    ) -> NskvResult<RateLimitResult> {
        let key = Algorithm::FixedWindow.key(identifier);

        let count = self.ns.incr(&key, 1).await?;
        if count == 1 {
            // only the request that opens the window arms its expiry
            self.ns.expire(&key, quota.window).await?;
        }

        let mut ttl_ms = self.ns.pttl(&key).await?;
        if ttl_ms < 0 {
            warn!(identifier = %identifier, ttl_ms, "fixed window counter without expiry, re-arming");
            self.ns.expire(&key, quota.window).await?;
            ttl_ms = quota.window.as_millis() as i64;
        }

        let ttl_ms = ttl_ms as u64;
        let count = count.max(0) as u64;
        let reset_at = now + ttl_ms;

        debug!(identifier = %identifier, count, limit = quota.max_requests, ttl_ms, "fixed window check");

        if count <= quota.max_requests {
            Ok(RateLimitResult::allowed(
                quota.max_requests - count,
                quota.max_requests,
                reset_at,
            ))
        } else {
            Ok(RateLimitResult::denied(
                quota.max_requests,
                reset_at,
                ttl_ms.div_ceil(1000),
            ))
        }
    }

    async fn usage(&self, identifier: &str) -> NskvResult<Option<RateLimitUsage>> {
        let key = Algorithm::FixedWindow.key(identifier);
        let Some(raw) = self.ns.get(&key).await? else {
            return Ok(None);
        };

        let count = raw.parse::<u64>().unwrap_or(0);
        let ttl_seconds = self.ns.ttl(&key).await?;
        Ok(Some(RateLimitUsage::FixedWindow { count, ttl_seconds }))
    }

    async fn reset(&self, identifier: &str) -> NskvResult<bool> {
        let key = Algorithm::FixedWindow.key(identifier);
        Ok(self.ns.del(&[&key]).await? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::{MemoryStore, SetOptions};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<ManualClock>, Namespace, FixedWindowLimiter) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let ns = Namespace::new(store, "rl").unwrap();
        (clock, ns.clone(), FixedWindowLimiter::new(ns))
    }

    fn quota(max_requests: u64, window_secs: u64) -> Quota {
        Quota {
            max_requests,
            window: Duration::from_secs(window_secs),
            capacity: max_requests,
            refill_rate: max_requests as f64 / window_secs as f64,
            cost: 1,
        }
    }

    #[tokio::test]
    async fn test_counts_down_then_denies() {
        let (clock, _, limiter) = setup();
        let quota = quota(3, 60);
        let now = clock.now_millis();

        for expected in [2, 1, 0] {
            let result = limiter.check("client", &quota, now).await.unwrap();
            assert!(result.allowed);
            assert_eq!(result.remaining, expected);
            assert_eq!(result.reset_at, now + 60_000);
        }

        let denied = limiter.check("client", &quota, now).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(60));
    }

    #[tokio::test]
    async fn test_ttl_is_not_extended_by_later_requests() {
        let (clock, ns, limiter) = setup();
        let quota = quota(10, 60);

        limiter.check("client", &quota, clock.now_millis()).await.unwrap();
        clock.advance(Duration::from_secs(20));
        let result = limiter.check("client", &quota, clock.now_millis()).await.unwrap();

        assert_eq!(ns.ttl("fixed:client").await.unwrap(), 40);
        assert_eq!(result.reset_at, clock.now_millis() + 40_000);
    }

    #[tokio::test]
    async fn test_window_expiry_starts_fresh_count() {
        let (clock, _, limiter) = setup();
        let quota = quota(1, 10);

        assert!(limiter.check("c", &quota, clock.now_millis()).await.unwrap().allowed);
        assert!(!limiter.check("c", &quota, clock.now_millis()).await.unwrap().allowed);

        clock.advance(Duration::from_secs(10));
        assert!(limiter.check("c", &quota, clock.now_millis()).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_reset_at_keeps_sub_second_remainder() {
        let (clock, _, limiter) = setup();
        let quota = quota(1, 10);
        let start = clock.now_millis();

        limiter.check("client", &quota, start).await.unwrap();
        clock.advance(Duration::from_millis(9_700));
        let denied = limiter.check("client", &quota, clock.now_millis()).await.unwrap();

        assert!(!denied.allowed);
        assert_eq!(denied.reset_at, start + 10_000);
        assert_eq!(denied.retry_after, Some(1));
    }

    #[tokio::test]
    async fn test_burst_across_window_boundary_admits_twice_the_limit() {
        let (clock, _, limiter) = setup();
        let quota = quota(5, 10);

        limiter.check("client", &quota, clock.now_millis()).await.unwrap();
        clock.advance(Duration::from_millis(9_999));
        for _ in 0..4 {
            assert!(limiter.check("client", &quota, clock.now_millis()).await.unwrap().allowed);
        }
        assert!(!limiter.check("client", &quota, clock.now_millis()).await.unwrap().allowed);

        // two ms later the window has rolled over
        clock.advance(Duration::from_millis(2));
        for _ in 0..5 {
            assert!(limiter.check("client", &quota, clock.now_millis()).await.unwrap().allowed);
        }
        assert!(!limiter.check("client", &quota, clock.now_millis()).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_counter_without_expiry_is_rearmed() {
        let (clock, ns, limiter) = setup();
        ns.set("fixed:client", "5", SetOptions::default()).await.unwrap();

        limiter
            .check("client", &quota(10, 30), clock.now_millis())
            .await
            .unwrap();
        assert_eq!(ns.ttl("fixed:client").await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_usage_and_reset() {
        let (clock, _, limiter) = setup();
        assert_eq!(limiter.usage("client").await.unwrap(), None);

        limiter.check("client", &quota(5, 60), clock.now_millis()).await.unwrap();
        limiter.check("client", &quota(5, 60), clock.now_millis()).await.unwrap();
        assert_eq!(
            limiter.usage("client").await.unwrap(),
            Some(RateLimitUsage::FixedWindow {
                count: 2,
                ttl_seconds: 60
            })
        );

        assert!(limiter.reset("client").await.unwrap());
        assert!(!limiter.reset("client").await.unwrap());
    }
}
