use envconfig::Envconfig;
use std::net::SocketAddr;
use std::time::Duration;

use crate::config_validator::ConfigValidator;
use crate::error::NskvError;
use crate::keyspace::{
    ANALYTICS_NAMESPACE, CACHE_NAMESPACE, QUEUE_NAMESPACE, RATE_LIMIT_NAMESPACE,
    SESSION_NAMESPACE,
};

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL
    #[envconfig(from = "REDIS_URL", default = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Store backend: `redis` or `memory`
    #[envconfig(from = "STORE_BACKEND", default = "redis")]
    pub backend: String,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Requests per minute each client may make against the HTTP API, 0 disables
    #[envconfig(from = "API_RATE_LIMIT", default = "600")]
    pub api_rate_limit: u64,

    /// How long completed and failed jobs stay queryable
    #[envconfig(from = "JOB_RETENTION_SECS", default = "86400")]
    pub job_retention_secs: u64,

    /// Idle time after which a token bucket is forgotten
    #[envconfig(from = "BUCKET_IDLE_TTL_SECS", default = "3600")]
    pub bucket_idle_ttl_secs: u64,

    #[envconfig(from = "SESSION_TTL_SECS", default = "86400")]
    pub session_ttl_secs: u64,

    /// Interval of the background job cleanup task in seconds
    #[envconfig(from = "CLEANUP_INTERVAL", default = "300")]
    pub cleanup_interval_secs: u64,

    /// Processing jobs older than this are requeued by the cleanup task, 0 disables
    #[envconfig(from = "STALE_JOB_TIMEOUT_SECS", default = "0")]
    pub stale_job_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            backend: "redis".to_string(),
            log_level: "info".to_string(),
            api_rate_limit: 600,
            job_retention_secs: 86_400,
            bucket_idle_ttl_secs: 3_600,
            session_ttl_secs: 86_400,
            cleanup_interval_secs: 300,
            stale_job_timeout_secs: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Configuration for an in-process store, used by tests and local runs
    pub fn in_memory() -> Self {
        Self {
            backend: "memory".to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), NskvError> {
        ConfigValidator::validate_bind_addr(&self.bind_addr)?;
        ConfigValidator::validate_backend(&self.backend)?;
        if self.uses_redis() {
            ConfigValidator::validate_redis_url(&self.redis_url)?;
        }
        for namespace in [
            RATE_LIMIT_NAMESPACE,
            QUEUE_NAMESPACE,
            CACHE_NAMESPACE,
            SESSION_NAMESPACE,
            ANALYTICS_NAMESPACE,
        ] {
            ConfigValidator::validate_namespace(namespace)?;
        }
        if self.api_rate_limit > 0 {
            // per minute
            ConfigValidator::validate_rate_limit(self.api_rate_limit, 60)?;
        }
        if self.session_ttl_secs == 0 {
            return Err(NskvError::Config(
                "Session TTL must be greater than 0".to_string(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(NskvError::Config(
                "Cleanup interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn uses_redis(&self) -> bool {
        self.backend.eq_ignore_ascii_case("redis")
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn bucket_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn stale_job_timeout(&self) -> Option<Duration> {
        (self.stale_job_timeout_secs > 0).then(|| Duration::from_secs(self.stale_job_timeout_secs))
    }
}
