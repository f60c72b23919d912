//! Error responses at the HTTP boundary.
//!
//! # Responsibilities
//! - Map relay and admission outcomes to status codes
//! - Attach retry hints (`Retry-After`) to the two retryable rejections
//! - Keep internal failure detail in the logs, not in the response body
//!
//! # Design Decisions
//! - Rate limiting and processor overload are the only failures the client
//!   can act on; both are 429 with a retry hint
//! - Everything else collapses to a generic 500

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::relay::error::RelayError;
use crate::security::headers::RateLimitInfo;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("rate limit exceeded")]
    RateLimited {
        info: RateLimitInfo,
        retry_after: Duration,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("audio processor busy")]
    Busy { retry_after_secs: u64 },

    #[error(transparent)]
    Relay(RelayError),
}

impl AppError {
    /// Busy becomes a retryable rejection; any other relay error stays opaque.
    pub fn from_relay(err: RelayError, busy_retry_after_secs: u64) -> Self {
        if err.is_busy() {
            AppError::Busy {
                retry_after_secs: busy_retry_after_secs,
            }
        } else {
            AppError::Relay(err)
        }
    }
}

/// Whole seconds to advertise in `Retry-After`: rounded up, at least one.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs_f64().ceil() as u64;
    secs.max(1)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

fn with_retry_after(mut response: Response, secs: u64) -> Response {
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    response
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::RateLimited { info, retry_after } => {
                let secs = retry_after_secs(retry_after);
                let body = ErrorBody {
                    error: "rate_limited",
                    message: format!("Too many requests. Limit is {} per {}", info.limit, info.window),
                    retry_after_secs: Some(secs),
                };
                let mut response =
                    with_retry_after((StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response(), secs);
                info.apply(response.headers_mut());
                response
            }
            AppError::BadRequest(message) => {
                let body = ErrorBody {
                    error: "bad_request",
                    message,
                    retry_after_secs: None,
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            AppError::Busy { retry_after_secs } => {
                let body = ErrorBody {
                    error: "busy",
                    message: "Audio processor is busy, try again shortly".to_string(),
                    retry_after_secs: Some(retry_after_secs),
                };
                with_retry_after(
                    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response(),
                    retry_after_secs,
                )
            }
            AppError::Relay(err) => {
                tracing::error!(error = %err, kind = err.kind(), "Relay request failed");
                let body = ErrorBody {
                    error: "internal",
                    message: "Internal server error".to_string(),
                    retry_after_secs: None,
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
