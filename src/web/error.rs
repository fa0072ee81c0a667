//! API error handling.
//!
//! Every [`Denial`] becomes an [`ApiError`] with a distinct status code and a
//! JSON body of the form `{"error": {"code", "message", "details"?}}`.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::admission::{Denial, DenialCode, InvalidInput};
use crate::storage::QuotaExceeded;

use super::dto::to_mb;

/// API error codes share the admission taxonomy.
pub type ErrorCode = DenialCode;

impl DenialCode {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DenialCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            DenialCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            DenialCode::InvalidInput => StatusCode::BAD_REQUEST,
            DenialCode::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            DenialCode::QuotaExceeded | DenialCode::GlobalQuotaExceeded => {
                StatusCode::INSUFFICIENT_STORAGE
            }
            DenialCode::NotFound => StatusCode::NOT_FOUND,
            DenialCode::ForbiddenPath => StatusCode::FORBIDDEN,
            DenialCode::InternalFault => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Error detail.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured figures (quota usage, rate limit window, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Option<Value>,
    retry_after: Option<Duration>,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Set a `Retry-After` header on the response.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Create a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a request-throttled error.
    pub fn too_many_requests(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::new(ErrorCode::RateLimited, message).with_retry_after(retry_after)
    }

    /// Create an internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalFault, message)
    }

    /// The error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

/// Whole seconds, rounded up, never below one.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

fn quota_details(exceeded: &QuotaExceeded) -> Value {
    match *exceeded {
        QuotaExceeded::Global {
            used,
            limit,
            incoming,
        }
        | QuotaExceeded::ClientBytes {
            used,
            limit,
            incoming,
        } => json!({
            "scope": if exceeded.is_global() { "global" } else { "client" },
            "current_usage_bytes": used,
            "current_usage_mb": to_mb(used),
            "quota_bytes": limit,
            "quota_mb": to_mb(limit),
            "remaining_mb": to_mb(limit.saturating_sub(used)),
            "file_size_bytes": incoming,
            "file_size_mb": to_mb(incoming),
            "overage_bytes": exceeded.overage(),
        }),
        QuotaExceeded::ClientFiles { count, limit } => json!({
            "scope": "client",
            "file_count": count,
            "max_file_count": limit,
        }),
    }
}

impl From<Denial> for ApiError {
    fn from(denial: Denial) -> Self {
        let code = denial.code();
        match &denial {
            Denial::RateLimited {
                retry_after,
                limit,
                window,
            } => ApiError::new(
                code,
                format!(
                    "Rate limit exceeded. Maximum {limit} uploads per {} seconds.",
                    window.as_secs()
                ),
            )
            .with_details(json!({
                "retry_after_secs": retry_after_secs(*retry_after),
                "limit": limit,
                "window_secs": window.as_secs(),
            }))
            .with_retry_after(*retry_after),
            Denial::InvalidInput(InvalidInput::DisallowedExtension { allowed, .. }) => {
                ApiError::new(code, denial.to_string())
                    .with_details(json!({ "allowed_extensions": allowed }))
            }
            Denial::InvalidInput(InvalidInput::FileTooLarge { size, limit }) => ApiError::new(
                code,
                format!("File too large. Maximum size: {}MB", to_mb(*limit)),
            )
            .with_details(json!({
                "file_size_bytes": size,
                "max_file_size_bytes": limit,
            })),
            Denial::QuotaExceeded(exceeded) => {
                ApiError::new(code, denial.to_string()).with_details(quota_details(exceeded))
            }
            Denial::NotFound(_) => ApiError::new(code, "File not found"),
            _ if denial.is_fault() => ApiError::new(code, "An internal error occurred"),
            _ => ApiError::new(code, denial.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        let retry_after = self.retry_after;
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = retry_after {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
        }
        response
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}
