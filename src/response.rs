use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of one rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u64,
    pub limit: u64,
    /// Epoch milliseconds at which the limit fully resets
    pub reset_at: u64,
    /// Seconds to wait before retrying, only set when denied
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    pub fn allowed(remaining: u64, limit: u64, reset_at: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            limit,
            reset_at,
            retry_after: None,
        }
    }

    /// A denial always asks the caller to wait at least one second.
    pub fn denied(limit: u64, reset_at: u64, retry_after: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit,
            reset_at,
            retry_after: Some(retry_after.max(1)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub store_connected: bool,
}

impl HealthResponse {
    pub fn new(store_connected: bool) -> Self {
        Self {
            status: if store_connected { "healthy" } else { "degraded" }.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store_connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_has_positive_retry_after() {
        let result = RateLimitResult::denied(10, 5_000, 0);
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.retry_after, Some(1));
    }

    #[test]
    fn test_allowed_omits_retry_after() {
        let result = RateLimitResult::allowed(4, 5, 1_000);
        assert!(result.allowed);
        assert_eq!(result.retry_after, None);
    }

    #[test]
    fn test_health_status_serialization() {
        let json = serde_json::to_string(&HealthResponse::new(false)).unwrap();
        assert!(json.contains("degraded"));
        assert!(json.contains("\"store_connected\":false"));
    }
}
