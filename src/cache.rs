//! Cache-aside helper with hit/miss accounting.
//!
//! Expiry is left entirely to the store's TTLs; nothing is evicted here.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NskvError, NskvResult};
use crate::namespace::Namespace;
use crate::store::KeyspaceStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups served from the cache, 0 before any lookup
    pub hit_rate: f64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache handle over one namespace. Clones share their counters.
#[derive(Clone)]
pub struct Cache {
    ns: Namespace,
    counters: Arc<Counters>,
}

impl Cache {
    pub fn new(ns: Namespace) -> Self {
        Self {
            ns,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Returns the cached value for `key`, or runs `loader` once, caches its
    /// result for `ttl` and returns it. Loader errors are returned as-is and
    /// nothing is cached.
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Sync,
        E: From<NskvError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key).await? {
            return Ok(value);
        }

        let value = loader().await?;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    /// Looks `key` up, counting a hit or a miss. An undecodable value is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> NskvResult<Option<T>> {
        let value = self.ns.get_json::<T>(key).await?;
        if value.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache hit");
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache miss");
        }
        Ok(value)
    }

    pub async fn set<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> NskvResult<()> {
        self.ns.set_json(key, value, Some(ttl)).await
    }

    pub async fn delete(&self, key: &str) -> NskvResult<bool> {
        Ok(self.ns.del(&[key]).await? > 0)
    }

    /// Drops every entry in the cache namespace.
    pub async fn clear(&self) -> NskvResult<u64> {
        self.ns.clear().await
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64 * 100.0
            },
        }
    }

    pub fn reset_stats(&self) {
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
    }
}
