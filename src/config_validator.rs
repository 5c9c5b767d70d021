use std::net::SocketAddr;

use crate::error::NskvError;

/// Validates configuration values and engine arguments for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), NskvError> {
        if url.is_empty() {
            return Err(NskvError::Validation(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(NskvError::Validation(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the server bind address
    pub fn validate_bind_addr(addr: &SocketAddr) -> Result<(), NskvError> {
        if addr.port() == 0 {
            return Err(NskvError::Validation(
                "Bind address must name a port".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the store backend name
    pub fn validate_backend(backend: &str) -> Result<(), NskvError> {
        let valid = ["redis", "memory"];
        if !valid.contains(&backend.to_lowercase().as_str()) {
            return Err(NskvError::Validation(format!(
                "Invalid store backend '{}'. Must be one of: {:?}",
                backend, valid
            )));
        }

        Ok(())
    }

    /// Validates a namespace name
    pub fn validate_namespace(name: &str) -> Result<(), NskvError> {
        if name.is_empty() || name == ":" {
            return Err(NskvError::Validation(
                "Namespace cannot be empty".to_string(),
            ));
        }

        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(NskvError::Validation(format!(
                "Namespace '{}' cannot contain whitespace or control characters",
                name.escape_debug()
            )));
        }

        Ok(())
    }

    /// Validates rate limit parameters
    pub fn validate_rate_limit(max_requests: u64, window_secs: u64) -> Result<(), NskvError> {
        if max_requests == 0 {
            return Err(NskvError::Validation(
                "Max requests must be greater than 0".to_string(),
            ));
        }

        if window_secs == 0 {
            return Err(NskvError::Validation(
                "Window must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates token bucket parameters
    pub fn validate_token_bucket(capacity: u64, refill_rate: f64) -> Result<(), NskvError> {
        if capacity == 0 {
            return Err(NskvError::Validation(
                "Bucket capacity must be greater than 0".to_string(),
            ));
        }

        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(NskvError::Validation(
                "Refill rate must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates a job priority
    pub fn validate_priority(priority: u8) -> Result<(), NskvError> {
        if !(1..=10).contains(&priority) {
            return Err(NskvError::Validation(format!(
                "Priority must be between 1 and 10, got {}",
                priority
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("redis://localhost:6379").is_ok());
        assert!(ConfigValidator::validate_redis_url("rediss://localhost:6379").is_ok());
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("").is_err());
        assert!(ConfigValidator::validate_redis_url("http://localhost:6379").is_err());
    }

    #[test]
    fn test_bind_addr() {
        assert!(ConfigValidator::validate_bind_addr(&"0.0.0.0:3000".parse().unwrap()).is_ok());
        assert!(ConfigValidator::validate_bind_addr(&"127.0.0.1:0".parse().unwrap()).is_err());
    }

    #[test]
    fn test_backend() {
        assert!(ConfigValidator::validate_backend("redis").is_ok());
        assert!(ConfigValidator::validate_backend("Memory").is_ok());
        assert!(ConfigValidator::validate_backend("sqlite").is_err());
    }

    #[test]
    fn test_namespace() {
        assert!(ConfigValidator::validate_namespace("tenant-1").is_ok());
        assert!(ConfigValidator::validate_namespace("tenant-1:").is_ok());
        assert!(ConfigValidator::validate_namespace("").is_err());
        assert!(ConfigValidator::validate_namespace(":").is_err());
        assert!(ConfigValidator::validate_namespace("two words").is_err());
    }

    #[test]
    fn test_rate_limit() {
        assert!(ConfigValidator::validate_rate_limit(100, 60).is_ok());
        assert!(ConfigValidator::validate_rate_limit(0, 60).is_err());
        assert!(ConfigValidator::validate_rate_limit(100, 0).is_err());
    }

    #[test]
    fn test_token_bucket() {
        assert!(ConfigValidator::validate_token_bucket(10, 0.5).is_ok());
        assert!(ConfigValidator::validate_token_bucket(0, 0.5).is_err());
        assert!(ConfigValidator::validate_token_bucket(10, 0.0).is_err());
        assert!(ConfigValidator::validate_token_bucket(10, f64::NAN).is_err());
    }

    #[test]
    fn test_priority() {
        assert!(ConfigValidator::validate_priority(1).is_ok());
        assert!(ConfigValidator::validate_priority(10).is_ok());
        assert!(ConfigValidator::validate_priority(0).is_err());
        assert!(ConfigValidator::validate_priority(11).is_err());
    }
}
