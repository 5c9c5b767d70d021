use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use crate::algorithms::{Algorithm, RateLimitOptions};
use crate::config::Config;
use crate::error::{NskvError, NskvResult};
use crate::keyspace::Keyspace;
use crate::queue::JobOptions;
use crate::response::{HealthResponse, RateLimitResult};

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub keyspace: Keyspace,
    pub config: Config,
}

impl AppState {
    pub fn new(keyspace: Keyspace, config: Config) -> SharedState {
        Arc::new(Self { keyspace, config })
    }
}

fn default_cost() -> u64 {
    1
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckRequest {
    #[validate(range(min = 1))]
    pub max_requests: u64,
    #[validate(range(min = 1, max = 86400))]
    pub window_secs: u64,
    #[serde(default)]
    pub algorithm: Option<Algorithm>,
    #[validate(range(min = 1))]
    pub capacity: Option<u64>,
    #[validate(range(exclusive_min = 0.0))]
    pub refill_rate: Option<f64>,
    #[serde(default = "default_cost")]
    #[validate(range(min = 1))]
    pub cost: u64,
}

impl CheckRequest {
    fn options(&self) -> RateLimitOptions {
        RateLimitOptions {
            algorithm: self.algorithm.unwrap_or(Algorithm::SlidingWindow),
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            cost: self.cost,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AlgorithmQuery {
    pub algorithm: Option<Algorithm>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub identifier: String,
    pub removed: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddJobRequest {
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 128))]
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[validate(range(min = 1, max = 10))]
    pub priority: Option<u8>,
    #[validate(range(max = 100))]
    pub max_retries: Option<u32>,
    /// Human readable delay such as `"30s"` or `"5m"`
    #[serde(default, with = "humantime_serde")]
    pub delay: Option<Duration>,
    /// Epoch milliseconds, wins over `delay`
    pub scheduled_for: Option<u64>,
}

impl AddJobRequest {
    fn options(&self) -> JobOptions {
        let defaults = JobOptions::default();
        JobOptions {
            priority: self.priority.unwrap_or(defaults.priority),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            delay: self.delay,
            scheduled_for: self.scheduled_for,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AddJobResponse {
    pub id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FailJobRequest {
    #[validate(length(min = 1, max = 4096))]
    pub error: String,
}

/// Writes the standard rate limit headers onto `headers`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(result.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(result.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(result.reset_at.div_ceil(1000)),
    );
    if let Some(retry_after) = result.retry_after {
        headers.insert("retry-after", HeaderValue::from(retry_after));
    }
}

/// Check a rate limit for an identifier
pub async fn check_rate_limit(
    State(state): State<SharedState>,
    Path(identifier): Path<String>,
    Json(payload): Json<CheckRequest>,
) -> NskvResult<Response> {
    payload.validate()?;

    let result = state
        .keyspace
        .rate_limiter
        .check(
            &identifier,
            payload.max_requests,
            Duration::from_secs(payload.window_secs),
            &payload.options(),
        )
        .await?;

    let status = if result.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };

    let mut response = (status, Json(&result)).into_response();
    apply_rate_limit_headers(response.headers_mut(), &result);
    Ok(response)
}

/// Stored rate limit state for an identifier
pub async fn get_rate_limit_usage(
    State(state): State<SharedState>,
    Path(identifier): Path<String>,
    Query(query): Query<AlgorithmQuery>,
) -> NskvResult<impl IntoResponse> {
    let algorithm = query.algorithm.unwrap_or(Algorithm::SlidingWindow);

    state
        .keyspace
        .rate_limiter
        .get_usage(&identifier, algorithm)
        .await?
        .map(Json)
        .ok_or_else(|| {
            NskvError::NotFound(format!("no {} record for '{}'", algorithm, identifier))
        })
}

/// Reset one algorithm, or all of them when no algorithm is given
pub async fn reset_rate_limit(
    State(state): State<SharedState>,
    Path(identifier): Path<String>,
    Query(query): Query<AlgorithmQuery>,
) -> NskvResult<impl IntoResponse> {
    let removed = state
        .keyspace
        .rate_limiter
        .reset(&identifier, query.algorithm)
        .await?;

    Ok(Json(ResetResponse {
        identifier,
        removed,
    }))
}

pub async fn add_job(
    State(state): State<SharedState>,
    Json(payload): Json<AddJobRequest>,
) -> NskvResult<impl IntoResponse> {
    payload.validate()?;

    let id = state
        .keyspace
        .queue
        .add(&payload.job_type, payload.payload.clone(), payload.options())
        .await?;

    Ok((StatusCode::CREATED, Json(AddJobResponse { id })))
}

/// Claim the next due job; 204 when nothing is due
pub async fn next_job(State(state): State<SharedState>) -> NskvResult<Response> {
    Ok(match state.keyspace.queue.next().await? {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

pub async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> NskvResult<impl IntoResponse> {
    state
        .keyspace
        .queue
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| NskvError::NotFound(format!("job '{}'", id)))
}

pub async fn complete_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> NskvResult<StatusCode> {
    if state.keyspace.queue.complete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(NskvError::NotFound(format!("processing job '{}'", id)))
    }
}

pub async fn fail_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<FailJobRequest>,
) -> NskvResult<impl IntoResponse> {
    payload.validate()?;

    state
        .keyspace
        .queue
        .fail(&id, &payload.error)
        .await?
        .map(Json)
        .ok_or_else(|| NskvError::NotFound(format!("processing job '{}'", id)))
}

pub async fn cancel_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> NskvResult<StatusCode> {
    if state.keyspace.queue.cancel(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(NskvError::NotFound(format!("pending job '{}'", id)))
    }
}

pub async fn retry_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> NskvResult<StatusCode> {
    if state.keyspace.queue.retry(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(NskvError::NotFound(format!("failed job '{}'", id)))
    }
}

pub async fn queue_stats(State(state): State<SharedState>) -> NskvResult<impl IntoResponse> {
    Ok(Json(state.keyspace.queue.get_stats().await?))
}

pub async fn cache_stats(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.keyspace.cache.stats())
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let health = HealthResponse::new(state.keyspace.is_healthy().await);
    let status = if health.store_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_request_defaults() {
        let req: CheckRequest =
            serde_json::from_str(r#"{"max_requests": 10, "window_secs": 60}"#).unwrap();
        assert!(req.validate().is_ok());
        let options = req.options();
        assert_eq!(options.algorithm, Algorithm::SlidingWindow);
        assert_eq!(options.cost, 1);
    }

    #[test]
    fn test_check_request_rejects_zero_window() {
        let req: CheckRequest =
            serde_json::from_str(r#"{"max_requests": 10, "window_secs": 0}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_add_job_request_parses_humantime_delay() {
        let req: AddJobRequest = serde_json::from_str(
            r#"{"type": "email", "payload": {"to": "a@b"}, "priority": 8, "delay": "30s"}"#,
        )
        .unwrap();
        assert!(req.validate().is_ok());

        let options = req.options();
        assert_eq!(options.priority, 8);
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.delay, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_add_job_request_rejects_priority() {
        let req: AddJobRequest =
            serde_json::from_str(r#"{"type": "email", "priority": 11}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &RateLimitResult::denied(5, 1_500, 3));
        assert_eq!(headers["x-ratelimit-limit"], "5");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["x-ratelimit-reset"], "2");
        assert_eq!(headers["retry-after"], "3");
    }
}
