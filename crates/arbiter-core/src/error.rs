use serde::Serialize;
use thiserror::Error;

use crate::types::Tier;

/// A single field-level validation failure, surfaced to clients in the
/// `details` array of an error body.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Which limiter produced a `RateLimited` failure. The HTTP layer uses this
/// to phrase the client message; internals never leak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScope {
    /// Rolling per-IP window.
    Ip,
    /// Per-day request-count quota for the tier.
    Requests,
    /// Per-day token budget for the tier.
    Tokens,
}

/// Cross-component failure taxonomy. Components raise these; only the HTTP
/// layer turns them into statuses and bodies.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation failed")]
    Validation { details: Vec<FieldError> },

    /// Injection/jailbreak classification. `family` is the matched pattern
    /// family, recorded server-side only — the client sees a generic message.
    #[error("request rejected")]
    InvalidRequestDetected { family: String },

    #[error("authentication required")]
    AuthenticationRequired,

    /// Single generic credential failure — never distinguishes unknown-email
    /// from wrong-password.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("tier '{required}' required, current tier is '{current}'")]
    InsufficientTier { required: Tier, current: Tier },

    #[error("rate limited")]
    RateLimited {
        scope: RateScope,
        /// Seconds until the window refills; becomes the Retry-After header.
        retry_after_secs: u64,
        limit: u64,
        remaining: u64,
        /// RFC3339 instant at which the quota resets.
        reset_at: String,
    },

    /// Process-wide daily budget exhausted.
    #[error("daily budget exceeded")]
    BudgetExceeded { reset_at: String },

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),

    /// Startup-only: bad configuration. Never reaches the HTTP layer —
    /// the process refuses to boot instead.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Taxonomy tag, for logging and for the `error` field of HTTP bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InvalidRequestDetected,
    AuthenticationRequired,
    InvalidCredentials,
    InsufficientTier,
    RateLimited,
    BudgetExceeded,
    UpstreamUnavailable,
    NotFound,
    Internal,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation { .. } => ErrorKind::Validation,
            GatewayError::InvalidRequestDetected { .. } => ErrorKind::InvalidRequestDetected,
            GatewayError::AuthenticationRequired => ErrorKind::AuthenticationRequired,
            GatewayError::InvalidCredentials => ErrorKind::InvalidCredentials,
            GatewayError::InsufficientTier { .. } => ErrorKind::InsufficientTier,
            GatewayError::RateLimited { .. } => ErrorKind::RateLimited,
            GatewayError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            GatewayError::UpstreamUnavailable => ErrorKind::UpstreamUnavailable,
            GatewayError::NotFound => ErrorKind::NotFound,
            GatewayError::Internal(_) => ErrorKind::Internal,
            GatewayError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Stable tag string for the `error` field in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::InvalidRequestDetected => "InvalidRequest",
            ErrorKind::AuthenticationRequired => "AuthenticationRequired",
            ErrorKind::InvalidCredentials => "InvalidCredentials",
            ErrorKind::InsufficientTier => "InsufficientTier",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::BudgetExceeded => "BudgetExceeded",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Internal => "InternalError",
        }
    }

    /// One validation failure on a single field.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Validation {
            details: vec![FieldError::new(field, message)],
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
