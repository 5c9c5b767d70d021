//! Rate limiting algorithms module
//!
//! Three interchangeable algorithms, each keeping its state in the rate
//! limiter's namespace under its own key family:
//!
//! | Algorithm | Key | State |
//! |-----------|-----|-------|
//! | Fixed window | `fixed:<id>` | counter whose TTL marks the window end |
//! | Sliding window | `sliding:<id>` | sorted set of request timestamps |
//! | Token bucket | `bucket:<id>` | JSON `{tokens, last_refill}` |

pub mod fixed_window;
pub mod sliding_window;
pub mod token_bucket;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NskvResult;
use crate::response::RateLimitResult;

pub use fixed_window::FixedWindowLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::{BucketState, TokenBucketLimiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::FixedWindow,
        Algorithm::SlidingWindow,
        Algorithm::TokenBucket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
        }
    }

    /// Key holding the state for `identifier`, relative to the limiter namespace.
    pub fn key(&self, identifier: &str) -> String {
        let family = match self {
            Algorithm::FixedWindow => "fixed",
            Algorithm::SlidingWindow => "sliding",
            Algorithm::TokenBucket => "bucket",
        };
        format!("{}:{}", family, identifier)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call options for [`crate::RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitOptions {
    pub algorithm: Algorithm,
    /// Token bucket size, defaults to `max_requests`
    pub capacity: Option<u64>,
    /// Tokens per second, defaults to `max_requests / window_secs`
    pub refill_rate: Option<f64>,
    /// Tokens consumed by one token bucket check
    pub cost: u64,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::SlidingWindow,
            capacity: None,
            refill_rate: None,
            cost: 1,
        }
    }
}

impl RateLimitOptions {
    pub fn fixed_window() -> Self {
        Self {
            algorithm: Algorithm::FixedWindow,
            ..Self::default()
        }
    }

    pub fn sliding_window() -> Self {
        Self {
            algorithm: Algorithm::SlidingWindow,
            ..Self::default()
        }
    }

    pub fn token_bucket(capacity: u64, refill_rate: f64) -> Self {
        Self {
            algorithm: Algorithm::TokenBucket,
            capacity: Some(capacity),
            refill_rate: Some(refill_rate),
            ..Self::default()
        }
    }

    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }
}

/// Fully resolved limit handed to an algorithm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub max_requests: u64,
    pub window: Duration,
    pub capacity: u64,
    pub refill_rate: f64,
    pub cost: u64,
}

impl Quota {
    pub fn window_millis(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

/// Raw stored state for one identifier, as returned by
/// [`crate::RateLimiter::get_usage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum RateLimitUsage {
    FixedWindow {
        count: u64,
        ttl_seconds: i64,
    },
    SlidingWindow {
        requests: u64,
        oldest: Option<u64>,
    },
    TokenBucket {
        tokens: f64,
        last_refill: u64,
    },
}

/// Trait for rate limiting algorithms
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync {
    /// Decide whether one request for `identifier` is allowed at `now` (epoch ms)
    async fn check(&self, identifier: &str, quota: &Quota, now: u64)
        -> NskvResult<RateLimitResult>;

    /// Current stored state, `None` when the identifier has no record
    async fn usage(&self, identifier: &str) -> NskvResult<Option<RateLimitUsage>>;

    /// Drop the record; returns whether one existed
    async fn reset(&self, identifier: &str) -> NskvResult<bool>;
}
