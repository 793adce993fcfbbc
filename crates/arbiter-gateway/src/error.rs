use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use arbiter_core::error::{FieldError, GatewayError, RateScope};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_TOKENS_LIMIT: HeaderName = HeaderName::from_static("x-tokens-limit");
pub const X_TOKENS_USED: HeaderName = HeaderName::from_static("x-tokens-used");
pub const X_TOKENS_REMAINING: HeaderName = HeaderName::from_static("x-tokens-remaining");

/// Wire shape of every error body: `{error, message, details?}`.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
    /// Internal detail — development mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Taxonomy-to-HTTP mapping. This is the only place statuses, generic
/// client messages, and rate-limit headers are decided.
pub struct ApiError {
    inner: GatewayError,
    dev: bool,
}

impl ApiError {
    pub fn new(inner: GatewayError, dev: bool) -> Self {
        Self { inner, dev }
    }

    /// Rejection path for extractors, where no state is at hand.
    pub fn opaque(inner: GatewayError) -> Self {
        Self { inner, dev: false }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = describe(&self.inner);

        let detail = if self.dev {
            Some(self.inner.to_string())
        } else {
            None
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.inner, "internal error surfaced as 500");
        }

        let body = ErrorBody {
            error: self.inner.code(),
            message,
            details,
            detail,
        };
        let mut response = (status, Json(body)).into_response();

        if let GatewayError::RateLimited {
            retry_after_secs,
            limit,
            remaining,
            reset_at,
            ..
        } = &self.inner
        {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, num_header(*retry_after_secs));
            headers.insert(X_RATELIMIT_LIMIT, num_header(*limit));
            headers.insert(X_RATELIMIT_REMAINING, num_header(*remaining));
            if let Ok(v) = HeaderValue::from_str(reset_at) {
                headers.insert(X_RATELIMIT_RESET, v);
            }
        }

        response
    }
}

fn describe(err: &GatewayError) -> (StatusCode, String, Option<Vec<FieldError>>) {
    match err {
        GatewayError::Validation { details } => (
            StatusCode::BAD_REQUEST,
            "Request validation failed".to_string(),
            Some(details.clone()),
        ),
        GatewayError::InvalidRequestDetected { .. } => (
            StatusCode::BAD_REQUEST,
            // The matched family stays server-side.
            "Your request could not be processed".to_string(),
            None,
        ),
        GatewayError::AuthenticationRequired => (
            StatusCode::UNAUTHORIZED,
            "Authentication required".to_string(),
            None,
        ),
        GatewayError::InvalidCredentials => (
            StatusCode::BAD_REQUEST,
            "Invalid email or password".to_string(),
            None,
        ),
        GatewayError::InsufficientTier { required, current } => (
            StatusCode::FORBIDDEN,
            format!("This feature requires the {required} tier (your tier: {current})"),
            None,
        ),
        GatewayError::RateLimited { scope, .. } => {
            let message = match scope {
                RateScope::Ip => "Too many requests from this address. Slow down.",
                RateScope::Requests => "Daily request limit reached for your tier.",
                RateScope::Tokens => "Daily token budget exhausted for your tier.",
            };
            (StatusCode::TOO_MANY_REQUESTS, message.to_string(), None)
        }
        GatewayError::BudgetExceeded { reset_at } => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Daily budget exceeded. Service resumes at {reset_at}."),
            None,
        ),
        GatewayError::UpstreamUnavailable => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "The assistant is temporarily unavailable. Please try again.".to_string(),
            None,
        ),
        GatewayError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string(), None),
        GatewayError::Internal(_) | GatewayError::Config(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Something went wrong".to_string(),
            None,
        ),
    }
}

fn num_header(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).expect("digits are a valid header value")
}
