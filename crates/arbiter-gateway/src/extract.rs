use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

use arbiter_core::error::GatewayError;
use arbiter_core::types::Principal;
use arbiter_sessions::cookie::SESSION_COOKIE;

use crate::app::AppState;
use crate::error::ApiError;

/// Client address as resolved by the IP-limit middleware (X-Forwarded-For
/// first, then the socket peer).
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl FromRequestParts<Arc<AppState>> for ClientIp {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ClientIp>()
            .cloned()
            .unwrap_or_else(|| ClientIp(ip_from_parts(parts))))
    }
}

/// Best-effort address resolution without middleware help.
pub fn ip_from_parts(parts: &Parts) -> String {
    forwarded_for(&parts.headers)
        .or_else(|| {
            parts
                .extensions
                .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn forwarded_for(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Optional session: principal when the cookie resolves, nothing otherwise.
/// Dead sessions were already destroyed by the resolve.
pub struct MaybeSession {
    pub principal: Option<Principal>,
    pub token: Option<String>,
}

impl FromRequestParts<Arc<AppState>> for MaybeSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
        let principal = token
            .as_deref()
            .and_then(|token| state.sessions.resolve(token));
        Ok(MaybeSession { principal, token })
    }
}

/// Required session: rejects with 401 when the cookie is absent or stale.
pub struct AuthSession {
    pub principal: Principal,
    pub token: String,
}

impl FromRequestParts<Arc<AppState>> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let MaybeSession { principal, token } =
            MaybeSession::from_request_parts(parts, state).await?;
        match (principal, token) {
            (Some(principal), Some(token)) => Ok(AuthSession { principal, token }),
            _ => Err(ApiError::new(
                GatewayError::AuthenticationRequired,
                state.config.server.dev,
            )),
        }
    }
}

/// Short, non-reversible correlation id for a session token: the first 8
/// hex chars. Enough to group a session's turns, useless to replay.
pub fn session_hint(token: &str) -> String {
    token.chars().take(8).collect()
}
