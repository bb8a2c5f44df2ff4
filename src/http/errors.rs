//! HTTP error handling and conversion

use crate::core::service::ServiceError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;

/// HTTP error types
#[derive(Debug, Clone)]
pub enum HttpError {
    /// Missing or malformed actor identity
    Unauthorized(String),
    Forbidden {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Validation errors
    BadRequest(String),
    ValidationError(HashMap<String, Vec<String>>),

    NotFound(String),
    Conflict(String),

    TooManyRequests {
        message: String,
        retry_after_secs: u64,
    },

    /// A scanner or other upstream failed
    BadGateway(String),

    InternalServerError(String),
}

impl HttpError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        HttpError::Forbidden {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Convert to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            HttpError::Forbidden { .. } => StatusCode::FORBIDDEN,
            HttpError::BadRequest(_) | HttpError::ValidationError(_) => StatusCode::BAD_REQUEST,
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::Conflict(_) => StatusCode::CONFLICT,
            HttpError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            HttpError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            HttpError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            HttpError::Unauthorized(_) => "UNAUTHORIZED",
            HttpError::Forbidden { .. } => "FORBIDDEN",
            HttpError::BadRequest(_) => "BAD_REQUEST",
            HttpError::ValidationError(_) => "VALIDATION_ERROR",
            HttpError::NotFound(_) => "NOT_FOUND",
            HttpError::Conflict(_) => "CONFLICT",
            HttpError::TooManyRequests { .. } => "RATE_LIMITED",
            HttpError::BadGateway(_) => "UPSTREAM_ERROR",
            HttpError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            HttpError::Forbidden {
                retry_after_secs, ..
            } => *retry_after_secs,
            HttpError::TooManyRequests {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            HttpError::Forbidden { message, .. } => write!(f, "Forbidden: {}", message),
            HttpError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            HttpError::ValidationError(errors) => {
                write!(f, "Validation Error: {:?}", errors)
            }
            HttpError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            HttpError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            HttpError::TooManyRequests { message, .. } => {
                write!(f, "Too Many Requests: {}", message)
            }
            HttpError::BadGateway(msg) => write!(f, "Bad Gateway: {}", msg),
            HttpError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
        }
    }
}

impl std::error::Error for HttpError {}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let retry_after = self.retry_after_secs();

        let (message, details) = match self {
            HttpError::ValidationError(errors) => {
                ("Validation failed".to_string(), Some(json!(errors)))
            }
            HttpError::Forbidden {
                message,
                retry_after_secs: Some(secs),
            }
            | HttpError::TooManyRequests {
                message,
                retry_after_secs: secs,
            } => (message, Some(json!({ "retryAfterSecs": secs }))),
            HttpError::Forbidden { message, .. } => (message, None),
            HttpError::Unauthorized(msg)
            | HttpError::BadRequest(msg)
            | HttpError::NotFound(msg)
            | HttpError::Conflict(msg)
            | HttpError::BadGateway(msg)
            | HttpError::InternalServerError(msg) => (msg, None),
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message,
                "details": details
            }
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Convert service errors to HTTP errors
impl From<ServiceError> for HttpError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => HttpError::BadRequest(msg),
            ServiceError::Policy {
                message,
                retry_after_secs,
            } => HttpError::Forbidden {
                message,
                retry_after_secs,
            },
            ServiceError::RateLimited {
                message,
                retry_after_secs,
            } => HttpError::TooManyRequests {
                message,
                retry_after_secs,
            },
            ServiceError::NotFound(msg) => HttpError::NotFound(msg),
            ServiceError::Conflict(msg) => HttpError::Conflict(msg),
            ServiceError::Forbidden(msg) => HttpError::forbidden(msg),
            ServiceError::External(msg) | ServiceError::Parse(msg) => HttpError::BadGateway(msg),
            ServiceError::Storage(msg) | ServiceError::Config(msg) => {
                HttpError::InternalServerError(msg)
            }
            ServiceError::Io(err) => HttpError::InternalServerError(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for HttpError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect();
        HttpError::ValidationError(fields)
    }
}

/// Result type alias for HTTP operations
pub type HttpResult<T> = Result<T, HttpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_errors_map_to_status_codes() {
        let cases = [
            (ServiceError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                ServiceError::Policy {
                    message: "x".into(),
                    retry_after_secs: None,
                },
                StatusCode::FORBIDDEN,
            ),
            (
                ServiceError::RateLimited {
                    message: "x".into(),
                    retry_after_secs: 60,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ServiceError::Conflict("x".into()), StatusCode::CONFLICT),
            (ServiceError::External("x".into()), StatusCode::BAD_GATEWAY),
            (
                ServiceError::Storage("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(HttpError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_rate_limited_response_sets_retry_after() {
        let response = HttpError::TooManyRequests {
            message: "slow down".into(),
            retry_after_secs: 120,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).map(|v| v.as_bytes()),
            Some(&b"120"[..])
        );
    }
}
