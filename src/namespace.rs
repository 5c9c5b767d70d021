//! Key-prefixing view over a shared store.
//!
//! A [`Namespace`] is itself a [`KeyspaceStore`]: every key or channel
//! argument is rewritten to `<namespace>:<key>` before delegating, and keys
//! returned by `scan` come back with that prefix stripped. Hash field names
//! are never prefixed, they already live inside the prefixed hash key.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use nskv::{MemoryStore, Namespace, KeyspaceStore, SetOptions};
//! # async fn demo() -> nskv::NskvResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let tenant_a = Namespace::new(store.clone(), "tenant-a")?;
//! let tenant_b = Namespace::new(store, "tenant-b")?;
//!
//! tenant_a.set("config", "{}", SetOptions::default()).await?;
//! assert!(tenant_b.get("config").await?.is_none());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config_validator::ConfigValidator;
use crate::error::NskvResult;
use crate::store::{KeyspaceStore, ScoredMember, SetOptions};

#[derive(Clone)]
pub struct Namespace {
    store: Arc<dyn KeyspaceStore>,
    prefix: String,
    decode_failures: Arc<AtomicU64>,
}

/// Appends the `:` separator unless `name` already ends with one.
pub fn normalize(name: &str) -> String {
    if name.ends_with(':') {
        name.to_string()
    } else {
        format!("{}:", name)
    }
}

/// Escapes glob metacharacters so a prefix matches itself literally.
fn glob_escape(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Namespace {
    pub fn new(store: Arc<dyn KeyspaceStore>, name: &str) -> NskvResult<Self> {
        ConfigValidator::validate_namespace(name)?;
        Ok(Self {
            store,
            prefix: normalize(name),
            decode_failures: Arc::new(AtomicU64::new(0)),
        })
    }

    /// A nested namespace: `a` scoped to `b` writes under `a:b:`.
    pub fn scoped(&self, name: &str) -> NskvResult<Self> {
        ConfigValidator::validate_namespace(name)?;
        Ok(Self {
            store: self.store.clone(),
            prefix: format!("{}{}", self.prefix, normalize(name)),
            decode_failures: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The full prefix including the trailing `:`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn keys(&self, keys: &[&str]) -> Vec<String> {
        keys.iter().map(|key| self.key(key)).collect()
    }

    fn strip<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }

    /// How many stored values under this namespace failed to decode and were
    /// reported as missing by [`Namespace::get_json`].
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Reads and decodes a JSON value. A value that does not decode is
    /// reported as absent and counted in [`Namespace::decode_failures`].
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> NskvResult<Option<T>> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    namespace = %self.prefix,
                    key = %key,
                    error = %err,
                    "stored value failed to decode, treating as missing"
                );
                Ok(None)
            }
        }
    }

    pub async fn set_json<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> NskvResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(
            key,
            &raw,
            SetOptions {
                ttl,
                ..SetOptions::default()
            },
        )
        .await?;
        Ok(())
    }

    /// Deletes every key under this namespace. Returns how many were removed.
    pub async fn clear(&self) -> NskvResult<u64> {
        let keys = self.scan("*").await?;
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let removed = self.del(&refs).await?;
        debug!(namespace = %self.prefix, removed, "namespace cleared");
        Ok(removed)
    }
}

#[async_trait]
impl KeyspaceStore for Namespace {
    async fn ping(&self) -> NskvResult<()> {
        self.store.ping().await
    }

    async fn get(&self, key: &str) -> NskvResult<Option<String>> {
        self.store.get(&self.key(key)).await
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> NskvResult<bool> {
        self.store.set(&self.key(key), value, options).await
    }

    async fn mget(&self, keys: &[&str]) -> NskvResult<Vec<Option<String>>> {
        let prefixed = self.keys(keys);
        let refs: Vec<&str> = prefixed.iter().map(String::as_str).collect();
        self.store.mget(&refs).await
    }

    async fn del(&self, keys: &[&str]) -> NskvResult<u64> {
        let prefixed = self.keys(keys);
        let refs: Vec<&str> = prefixed.iter().map(String::as_str).collect();
        self.store.del(&refs).await
    }

    async fn exists(&self, keys: &[&str]) -> NskvResult<u64> {
        let prefixed = self.keys(keys);
        let refs: Vec<&str> = prefixed.iter().map(String::as_str).collect();
        self.store.exists(&refs).await
    }

    async fn incr(&self, key: &str, delta: i64) -> NskvResult<i64> {
        self.store.incr(&self.key(key), delta).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> NskvResult<bool> {
        self.store.expire(&self.key(key), ttl).await
    }

    async fn ttl(&self, key: &str) -> NskvResult<i64> {
        self.store.ttl(&self.key(key)).await
    }

    async fn pttl(&self, key: &str) -> NskvResult<i64> {
        self.store.pttl(&self.key(key)).await
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> NskvResult<u64> {
        self.store.hset(&self.key(key), fields).await
    }

    async fn hget(&self, key: &str, field: &str) -> NskvResult<Option<String>> {
        self.store.hget(&self.key(key), field).await
    }

    async fn hgetall(&self, key: &str) -> NskvResult<HashMap<String, String>> {
        self.store.hgetall(&self.key(key)).await
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> NskvResult<u64> {
        self.store.hdel(&self.key(key), fields).await
    }

    async fn zadd(&self, key: &str, entries: &[(f64, &str)]) -> NskvResult<u64> {
        self.store.zadd(&self.key(key), entries).await
    }

    async fn zrem(&self, key: &str, members: &[&str]) -> NskvResult<u64> {
        self.store.zrem(&self.key(key), members).await
    }

    async fn zcard(&self, key: &str) -> NskvResult<u64> {
        self.store.zcard(&self.key(key)).await
    }

    async fn zscore(&self, key: &str, member: &str) -> NskvResult<Option<f64>> {
        self.store.zscore(&self.key(key), member).await
    }

    async fn zrank(&self, key: &str, member: &str) -> NskvResult<Option<u64>> {
        self.store.zrank(&self.key(key), member).await
    }

    async fn zrevrank(&self, key: &str, member: &str) -> NskvResult<Option<u64>> {
        self.store.zrevrank(&self.key(key), member).await
    }

    async fn zincrby(&self, key: &str, delta: f64, member: &str) -> NskvResult<f64> {
        self.store.zincrby(&self.key(key), delta, member).await
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> NskvResult<Vec<ScoredMember>> {
        self.store.zrange(&self.key(key), start, stop).await
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> NskvResult<Vec<ScoredMember>> {
        self.store.zrevrange(&self.key(key), start, stop).await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(usize, usize)>,
    ) -> NskvResult<Vec<ScoredMember>> {
        self.store
            .zrange_by_score(&self.key(key), min, max, limit)
            .await
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> NskvResult<u64> {
        self.store
            .zrem_range_by_score(&self.key(key), min, max)
            .await
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> NskvResult<u64> {
        self.store.sadd(&self.key(key), members).await
    }

    async fn srem(&self, key: &str, members: &[&str]) -> NskvResult<u64> {
        self.store.srem(&self.key(key), members).await
    }

    async fn smembers(&self, key: &str) -> NskvResult<Vec<String>> {
        self.store.smembers(&self.key(key)).await
    }

    async fn sismember(&self, key: &str, member: &str) -> NskvResult<bool> {
        self.store.sismember(&self.key(key), member).await
    }

    async fn scard(&self, key: &str) -> NskvResult<u64> {
        self.store.scard(&self.key(key)).await
    }

    async fn scan(&self, pattern: &str) -> NskvResult<Vec<String>> {
        let prefixed = format!("{}{}", glob_escape(&self.prefix), pattern);
        let keys = self.store.scan(&prefixed).await?;
        Ok(keys
            .iter()
            .map(|key| self.strip(key).to_string())
            .collect())
    }

    async fn pfadd(&self, key: &str, elements: &[&str]) -> NskvResult<bool> {
        self.store.pfadd(&self.key(key), elements).await
    }

    async fn pfcount(&self, keys: &[&str]) -> NskvResult<u64> {
        let prefixed = self.keys(keys);
        let refs: Vec<&str> = prefixed.iter().map(String::as_str).collect();
        self.store.pfcount(&refs).await
    }

    async fn pfmerge(&self, dest: &str, sources: &[&str]) -> NskvResult<()> {
        let prefixed = self.keys(sources);
        let refs: Vec<&str> = prefixed.iter().map(String::as_str).collect();
        self.store.pfmerge(&self.key(dest), &refs).await
    }

    async fn publish(&self, channel: &str, message: &str) -> NskvResult<u64> {
        self.store.publish(&self.key(channel), message).await
    }
}
