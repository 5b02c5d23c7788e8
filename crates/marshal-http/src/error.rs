// crates/marshal-http/src/error.rs
// ============================================================================
// Module: HTTP Error Envelope
// Description: Error-code to status mapping and the JSON error envelope.
// Purpose: Surface the machine-readable error taxonomy over HTTP.
// Dependencies: axum, marshal-core, serde
// ============================================================================

//! ## Overview
//! Every failure leaves the API as
//! `{"error": {"code", "message", "details"?}}` with a status code derived
//! from the machine-readable taxonomy. Validation failures on payload-bearing
//! endpoints map to 422; creation validation maps to 400; size, content-type,
//! and throttle violations carry their dedicated statuses.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::IntoResponse;
use axum::response::Response;
use marshal_core::runtime::ErrorCode;
use marshal_core::runtime::LifecycleError;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Inner error payload of the envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// JSON error envelope returned by every failing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    /// Error payload.
    pub error: ErrorBody,
}

// ============================================================================
// SECTION: API Error
// ============================================================================

/// An API failure carrying its status, code, and optional retry hint.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status to respond with.
    pub status: StatusCode,
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    pub details: Option<Value>,
    /// Retry delay surfaced in the `retry-after` header, in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ApiError {
    /// Builds an error with the given status and code.
    #[must_use]
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            retry_after_ms: None,
        }
    }

    /// Builds a 404 not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, message)
    }

    /// Builds a 415 unsupported-media-type error.
    #[must_use]
    pub fn unsupported_media_type() -> Self {
        Self::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorCode::Invalid,
            "content-type must be application/json",
        )
    }

    /// Builds a 413 payload-too-large error.
    #[must_use]
    pub fn payload_too_large(max_bytes: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::Invalid,
            format!("request body exceeds {max_bytes} bytes"),
        )
    }

    /// Builds a 429 throttle error with a retry hint.
    #[must_use]
    pub fn rate_limited(retry_after_ms: u64) -> Self {
        let mut error = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::RateLimited,
            "heartbeat throttled; reduce cadence",
        );
        error.retry_after_ms = Some(retry_after_ms);
        error
    }

    /// Builds an unprocessable-entity error for a malformed body.
    #[must_use]
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::Invalid, message)
    }

    /// Builds a bad-request error for a malformed body.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::Invalid, message)
    }

    /// Builds a 503 deadline-exceeded error.
    #[must_use]
    pub fn deadline_exceeded() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Unavailable,
            "request deadline exceeded",
        )
    }

    /// Maps a lifecycle error to its HTTP form. `invalid_status` selects the
    /// status used for validation failures (400 for creation, 422 for
    /// payload-bearing endpoints).
    #[must_use]
    pub fn from_lifecycle(error: &LifecycleError, invalid_status: StatusCode) -> Self {
        let code = error.code();
        let status = match error {
            LifecycleError::Invalid { .. } => invalid_status,
            LifecycleError::NotFound { .. } => StatusCode::NOT_FOUND,
            LifecycleError::Conflict { .. } => StatusCode::CONFLICT,
            LifecycleError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            LifecycleError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let retry_after_ms = match error {
            LifecycleError::Unavailable { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        };
        Self {
            status,
            code,
            message: error.to_string(),
            details: None,
            retry_after_ms,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.code.as_str(),
                message: self.message,
                details: self.details,
            },
        };
        let mut response = (self.status, Json(envelope)).into_response();
        if let Some(retry_after_ms) = self.retry_after_ms {
            let seconds = retry_after_ms.div_ceil(1_000).max(1);
            if let Ok(value) = seconds.to_string().parse() {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}
