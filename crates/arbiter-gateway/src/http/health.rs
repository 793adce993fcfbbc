//! Liveness/readiness endpoint, outside the rate-limited API surface.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthReply {
    pub status: &'static str,
    pub database: &'static str,
    pub model: String,
    pub version: &'static str,
}

/// GET /health — cheap row-store ping plus the configured model id.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReply>) {
    let db_ok = state
        .db
        .lock()
        .unwrap()
        .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .is_ok();

    let (status_code, status, database) = if db_ok {
        (StatusCode::OK, "ok", "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unreachable")
    };

    (
        status_code,
        Json(HealthReply {
            status,
            database,
            model: state.config.upstream.model.clone(),
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
