use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use arbiter_guard::limits::check_ip;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extract::{forwarded_for, ClientIp};

/// First admission stage, applied to the whole /api surface: the rolling
/// per-IP window. Also resolves the client address once and stashes it in
/// request extensions for the handlers.
pub async fn ip_limit(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let ip = forwarded_for(req.headers())
        .or_else(|| {
            req.extensions()
                .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    // Per-IP limit is tier-independent; the anonymous row carries it.
    let per_minute = state.config.tiers.anonymous.ip_per_minute;
    if let Err(e) = check_ip(&state.kv, &ip, per_minute) {
        return ApiError::new(e, state.config.server.dev).into_response();
    }

    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}
