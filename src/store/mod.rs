//! The key-value store contract every engine is written against.
//!
//! [`KeyspaceStore`] mirrors the subset of Redis the engines need: strings
//! with TTLs, atomic counters, hashes, sorted sets, sets, glob scans and
//! HyperLogLogs. [`RedisStore`] speaks to a real server; [`MemoryStore`]
//! keeps everything in-process for tests and single-node use.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::NskvResult;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Condition attached to a `set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetCondition {
    #[default]
    Always,
    /// `NX`
    IfAbsent,
    /// `XX`
    IfPresent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Expiry for the written value. `None` writes a persistent value and
    /// clears any previous TTL.
    pub ttl: Option<Duration>,
    pub condition: SetCondition,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn if_absent(mut self) -> Self {
        self.condition = SetCondition::IfAbsent;
        self
    }

    pub fn if_present(mut self) -> Self {
        self.condition = SetCondition::IfPresent;
        self
    }
}

/// Sorted-set member paired with its score.
pub type ScoredMember = (String, f64);

#[async_trait]
pub trait KeyspaceStore: Send + Sync {
    async fn ping(&self) -> NskvResult<()>;

    async fn get(&self, key: &str) -> NskvResult<Option<String>>;

    /// Returns `false` when the condition prevented the write.
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> NskvResult<bool>;

    async fn mget(&self, keys: &[&str]) -> NskvResult<Vec<Option<String>>>;

    /// Returns the number of keys removed.
    async fn del(&self, keys: &[&str]) -> NskvResult<u64>;

    /// Returns how many of the keys exist.
    async fn exists(&self, keys: &[&str]) -> NskvResult<u64>;

    /// Atomically add `delta` and return the new value.
    async fn incr(&self, key: &str, delta: i64) -> NskvResult<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> NskvResult<bool>;

    /// Remaining TTL in seconds; `-1` when the key has no expiry and `-2`
    /// when it does not exist.
    async fn ttl(&self, key: &str) -> NskvResult<i64>;

    /// Remaining TTL in milliseconds, with the same `-1`/`-2` sentinels as
    /// [`ttl`](Self::ttl).
    async fn pttl(&self, key: &str) -> NskvResult<i64>;

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> NskvResult<u64>;

    async fn hget(&self, key: &str, field: &str) -> NskvResult<Option<String>>;

    async fn hgetall(&self, key: &str) -> NskvResult<HashMap<String, String>>;

    async fn hdel(&self, key: &str, fields: &[&str]) -> NskvResult<u64>;

    /// Returns the number of members newly added.
    async fn zadd(&self, key: &str, entries: &[(f64, &str)]) -> NskvResult<u64>;

    /// Returns the number of members actually removed. Callers racing for
    /// the same member use this count to learn who won.
    async fn zrem(&self, key: &str, members: &[&str]) -> NskvResult<u64>;

    async fn zcard(&self, key: &str) -> NskvResult<u64>;

    async fn zscore(&self, key: &str, member: &str) -> NskvResult<Option<f64>>;

    async fn zrank(&self, key: &str, member: &str) -> NskvResult<Option<u64>>;

    async fn zrevrank(&self, key: &str, member: &str) -> NskvResult<Option<u64>>;

    async fn zincrby(&self, key: &str, delta: f64, member: &str) -> NskvResult<f64>;

    /// Members by ascending rank, inclusive, negative indexes count from the end.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> NskvResult<Vec<ScoredMember>>;

    async fn zrevrange(&self, key: &str, start: i64, stop: i64)
        -> NskvResult<Vec<ScoredMember>>;

    /// Members with `min <= score <= max` in ascending order, optionally
    /// paged by `(offset, count)`.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(usize, usize)>,
    ) -> NskvResult<Vec<ScoredMember>>;

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> NskvResult<u64>;

    async fn sadd(&self, key: &str, members: &[&str]) -> NskvResult<u64>;

    async fn srem(&self, key: &str, members: &[&str]) -> NskvResult<u64>;

    async fn smembers(&self, key: &str) -> NskvResult<Vec<String>>;

    async fn sismember(&self, key: &str, member: &str) -> NskvResult<bool>;

    async fn scard(&self, key: &str) -> NskvResult<u64>;

    /// Every key matching the glob `pattern`, fully materialized.
    async fn scan(&self, pattern: &str) -> NskvResult<Vec<String>>;

    /// Returns `true` if the estimated cardinality changed.
    async fn pfadd(&self, key: &str, elements: &[&str]) -> NskvResult<bool>;

    async fn pfcount(&self, keys: &[&str]) -> NskvResult<u64>;

    async fn pfmerge(&self, dest: &str, sources: &[&str]) -> NskvResult<()>;

    /// Returns the number of subscribers that received the message.
    async fn publish(&self, channel: &str, message: &str) -> NskvResult<u64>;
}
