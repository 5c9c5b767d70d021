use std::sync::Arc;

use tracing::{info, warn};

use crate::analytics::Analytics;
use crate::cache::Cache;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::NskvResult;
use crate::namespace::Namespace;
use crate::queue::JobQueue;
use crate::rate_limiter::RateLimiter;
use crate::session::SessionManager;
use crate::store::{KeyspaceStore, MemoryStore, RedisStore};

pub const RATE_LIMIT_NAMESPACE: &str = "ratelimit";
pub const QUEUE_NAMESPACE: &str = "queue";
pub const CACHE_NAMESPACE: &str = "cache";
pub const SESSION_NAMESPACE: &str = "session";
pub const ANALYTICS_NAMESPACE: &str = "analytics";

/// Every engine wired onto one shared store, each in its own namespace.
#[derive(Clone)]
pub struct Keyspace {
    store: Arc<dyn KeyspaceStore>,
    clock: Arc<dyn Clock>,
    pub rate_limiter: RateLimiter,
    pub queue: JobQueue,
    pub cache: Cache,
    pub sessions: SessionManager,
    pub analytics: Analytics,
}

impl Keyspace {
    /// Engines with default settings.
    pub fn new(store: Arc<dyn KeyspaceStore>, clock: Arc<dyn Clock>) -> NskvResult<Self> {
        Self::with_config(store, clock, &Config::default())
    }

    /// Engines tuned from `config` (retention and TTL settings).
    pub fn with_config(
        store: Arc<dyn KeyspaceStore>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> NskvResult<Self> {
        let ns = |name: &str| Namespace::new(store.clone(), name);

        Ok(Self {
            rate_limiter: RateLimiter::new(ns(RATE_LIMIT_NAMESPACE)?, clock.clone())
                .with_bucket_idle_ttl(config.bucket_idle_ttl()),
            queue: JobQueue::new(ns(QUEUE_NAMESPACE)?, clock.clone())
                .with_retention(config.job_retention()),
            cache: Cache::new(ns(CACHE_NAMESPACE)?),
            sessions: SessionManager::new(ns(SESSION_NAMESPACE)?, clock.clone())
                .with_ttl(config.session_ttl()),
            analytics: Analytics::new(ns(ANALYTICS_NAMESPACE)?, clock.clone()),
            store,
            clock,
        })
    }

    /// Opens the backend named in `config` and builds every engine on it.
    pub async fn connect(config: &Config) -> NskvResult<Self> {
        let store: Arc<dyn KeyspaceStore> = if config.uses_redis() {
            Arc::new(RedisStore::connect(&config.redis_url).await?)
        } else {
            info!("using in-process memory store");
            Arc::new(MemoryStore::new())
        };

        Self::with_config(store, Arc::new(SystemClock), config)
    }

    pub fn store(&self) -> &Arc<dyn KeyspaceStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// A namespace on the shared store for callers with their own key layout.
    pub fn namespace(&self, name: &str) -> NskvResult<Namespace> {
        Namespace::new(self.store.clone(), name)
    }

    /// Whether the shared store answers a ping.
    pub async fn is_healthy(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "store ping failed");
                false
            }
        }
    }
}
