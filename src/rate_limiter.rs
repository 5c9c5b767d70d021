use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::algorithms::{
    Algorithm, FixedWindowLimiter, Quota, RateLimitAlgorithm, RateLimitOptions, RateLimitUsage,
    SlidingWindowLimiter, TokenBucketLimiter,
};
use crate::clock::Clock;
use crate::config_validator::ConfigValidator;
use crate::error::{NskvError, NskvResult};
use crate::namespace::Namespace;
use crate::response::RateLimitResult;

/// Rate limiter over one namespace, dispatching to the algorithm named in
/// each call's [`RateLimitOptions`].
#[derive(Clone)]
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    fixed: Arc<FixedWindowLimiter>,
    sliding: Arc<SlidingWindowLimiter>,
    bucket: Arc<TokenBucketLimiter>,
    ns: Namespace,
}

impl RateLimiter {
    pub fn new(ns: Namespace, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            fixed: Arc::new(FixedWindowLimiter::new(ns.clone())),
            sliding: Arc::new(SlidingWindowLimiter::new(ns.clone())),
            bucket: Arc::new(TokenBucketLimiter::new(ns.clone())),
            ns,
        }
    }

    /// How long an untouched token bucket survives in the store.
    pub fn with_bucket_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.bucket = Arc::new(TokenBucketLimiter::new(self.ns.clone()).with_idle_ttl(idle_ttl));
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    fn algorithm(&self, algorithm: Algorithm) -> &dyn RateLimitAlgorithm {
        match algorithm {
            Algorithm::FixedWindow => self.fixed.as_ref(),
            Algorithm::SlidingWindow => self.sliding.as_ref(),
            Algorithm::TokenBucket => self.bucket.as_ref(),
        }
    }

    fn quota(max_requests: u64, window: Duration, options: &RateLimitOptions) -> NskvResult<Quota> {
        ConfigValidator::validate_rate_limit(max_requests, window.as_secs())?;

        let capacity = options.capacity.unwrap_or(max_requests);
        let refill_rate = options
            .refill_rate
            .unwrap_or(max_requests as f64 / window.as_secs_f64());

        if options.algorithm == Algorithm::TokenBucket {
            ConfigValidator::validate_token_bucket(capacity, refill_rate)?;
            if options.cost == 0 || options.cost > capacity {
                return Err(NskvError::Validation(format!(
                    "Cost must be between 1 and the bucket capacity ({}), got {}",
                    capacity, options.cost
                )));
            }
        }

        Ok(Quota {
            max_requests,
            window,
            capacity,
            refill_rate,
            cost: options.cost,
        })
    }

    /// Checks one request for `identifier` against `max_requests` per `window`.
    pub async fn check(
        &self,
        identifier: &str,
        max_requests: u64,
        window: Duration,
        options: &RateLimitOptions,
    ) -> NskvResult<RateLimitResult> {
        let quota = Self::quota(max_requests, window, options)?;
        let now = self.clock.now_millis();

        let result = self
            .algorithm(options.algorithm)
            .check(identifier, &quota, now)
            .await?;

        debug!(
            identifier = %identifier,
            algorithm = %options.algorithm,
            allowed = result.allowed,
            remaining = result.remaining,
            "rate limit checked"
        );

        Ok(result)
    }

    /// Drops the stored state for one algorithm, or for all three when
    /// `algorithm` is `None`. Returns how many records were removed.
    pub async fn reset(&self, identifier: &str, algorithm: Option<Algorithm>) -> NskvResult<u64> {
        let targets: Vec<Algorithm> = match algorithm {
            Some(algorithm) => vec![algorithm],
            None => Algorithm::ALL.to_vec(),
        };

        let mut removed = 0;
        for algorithm in targets {
            if self.algorithm(algorithm).reset(identifier).await? {
                removed += 1;
            }
        }

        info!(identifier = %identifier, removed, "rate limit reset");
        Ok(removed)
    }

    pub async fn get_usage(
        &self,
        identifier: &str,
        algorithm: Algorithm,
    ) -> NskvResult<Option<RateLimitUsage>> {
        self.algorithm(algorithm).usage(identifier).await
    }
}
