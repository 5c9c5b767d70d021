use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NskvError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type NskvResult<T> = Result<T, NskvError>;

impl From<redis::RedisError> for NskvError {
    fn from(err: redis::RedisError) -> Self {
        NskvError::Store(err.to_string())
    }
}

impl From<validator::ValidationErrors> for NskvError {
    fn from(err: validator::ValidationErrors) -> Self {
        NskvError::Validation(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &NskvError) -> Self {
        let message = err.to_string();
        match err {
            NskvError::Validation(_) => Self::new("validation_error", &message, 422),
            NskvError::NotFound(_) => Self::new("not_found", &message, 404),
            NskvError::Store(_) => Self::new("service_unavailable", &message, 503),
            NskvError::Config(_) => Self::new("configuration_error", &message, 500),
            NskvError::Serialization(_) | NskvError::Internal(_) => {
                Self::new("internal_error", &message, 500)
            }
        }
    }
}

impl IntoResponse for NskvError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let cases = [
            (NskvError::Validation("bad".into()), 422),
            (NskvError::NotFound("job".into()), 404),
            (NskvError::Store("down".into()), 503),
            (NskvError::Internal("oops".into()), 500),
        ];

        for (err, code) in cases {
            assert_eq!(ErrorResponse::from_error(&err).code, code);
        }
    }

    #[test]
    fn test_into_response_status() {
        let response = NskvError::Validation("priority".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
