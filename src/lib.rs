pub mod algorithms;
pub mod analytics;
pub mod cache;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod keyspace;
pub mod middleware;
pub mod namespace;
pub mod queue;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod session;
pub mod store;

pub use algorithms::{Algorithm, RateLimitOptions, RateLimitUsage};
pub use analytics::Analytics;
pub use cache::{Cache, CacheStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{NskvError, NskvResult};
pub use keyspace::Keyspace;
pub use namespace::Namespace;
pub use queue::{FailOutcome, Job, JobOptions, JobQueue, JobStatus, QueueStats};
pub use rate_limiter::RateLimiter;
pub use response::RateLimitResult;
pub use server::{create_app, Server};
pub use session::{DeviceInfo, Session, SessionManager};
pub use store::{KeyspaceStore, MemoryStore, RedisStore, SetCondition, SetOptions};
