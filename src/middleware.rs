use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

use crate::algorithms::RateLimitOptions;
use crate::error::ErrorResponse;
use crate::handlers::{apply_rate_limit_headers, SharedState};

const API_WINDOW: Duration = Duration::from_secs(60);

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);

    info!(
        target: "nskv::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "nskv::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}

/// Limits every client IP to `API_RATE_LIMIT` requests per minute using the
/// sliding window limiter. The health endpoint is exempt, and a store error
/// lets the request through.
pub async fn rate_limit_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let limit = state.config.api_rate_limit;
    if limit == 0 || request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let identifier = format!("api:{}", get_client_ip(&request));
    let result = match state
        .keyspace
        .rate_limiter
        .check(&identifier, limit, API_WINDOW, &RateLimitOptions::sliding_window())
        .await
    {
        Ok(result) => result,
        Err(err) => {
            warn!(client = %identifier, error = %err, "API rate limit check failed, allowing request");
            return next.run(request).await;
        }
    };

    let mut response = if result.allowed {
        next.run(request).await
    } else {
        warn!(client = %identifier, "API rate limit exceeded");
        let body = ErrorResponse::new(
            "rate_limited",
            &format!("Rate limit of {} requests per minute exceeded", limit),
            StatusCode::TOO_MANY_REQUESTS.as_u16(),
        );
        (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
    };

    apply_rate_limit_headers(response.headers_mut(), &result);
    response
}

pub(crate) fn get_client_ip(request: &Request) -> String {
    // Try to get real IP from headers first
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    // Fallback to connection info
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_get_client_ip_with_forwarded_header() {
        let mut request = Request::new(axum::body::Body::empty());
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );

        let ip = get_client_ip(&request);
        assert_eq!(ip, "192.168.1.1");
    }

    #[test]
    fn test_get_client_ip_with_real_ip_header() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        let ip = get_client_ip(&request);
        assert_eq!(ip, "203.0.113.1");
    }

    #[test]
    fn test_get_client_ip_from_connect_info() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 1, 2, 3], 4000))));

        assert_eq!(get_client_ip(&request), "10.1.2.3");
    }

    #[test]
    fn test_get_client_ip_fallback() {
        let request = Request::new(axum::body::Body::empty());
        let ip = get_client_ip(&request);
        assert_eq!(ip, "unknown");
    }
}
