//! Account endpoints: register, login, logout, me.
//!
//! Register and login run the Argon2 KDF — both hop onto the blocking pool
//! under the KDF semaphore so password work can't starve request handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use arbiter_core::error::GatewayError;
use arbiter_core::types::{Principal, Tier};
use arbiter_sessions::cookie::{clear_cookie, session_cookie};

use crate::app::AppState;
use crate::error::ApiError;
use crate::extract::{AuthSession, MaybeSession};

#[derive(Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBody {
    pub id: String,
    pub email: String,
    pub tier: Tier,
    pub email_verified: bool,
}

#[derive(Serialize)]
pub struct AuthReply {
    pub user: UserBody,
}

/// POST /api/auth/register — create the account, mint a session, set the
/// cookie. 201 on success, field-level 400s otherwise.
pub async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<(StatusCode, CookieJar, Json<AuthReply>), ApiError> {
    let Json(creds) = body.map_err(|e| bad_body(&state, e))?;

    let (token, principal) = run_kdf(&state, move |sessions| {
        sessions.register(&creds.email, &creds.password)
    })
    .await?;

    let jar = jar.add(session_cookie(
        token,
        !state.config.server.dev,
        state.config.auth.days,
    ));
    let reply = auth_reply(&state, &principal)?;
    Ok((StatusCode::CREATED, jar, Json(reply)))
}

/// POST /api/auth/login — same body and reply shape as register, 200.
/// Unknown email and wrong password are byte-identical 400s.
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<(CookieJar, Json<AuthReply>), ApiError> {
    let Json(creds) = body.map_err(|e| bad_body(&state, e))?;

    let (token, principal) = run_kdf(&state, move |sessions| {
        sessions.login(&creds.email, &creds.password)
    })
    .await?;

    let jar = jar.add(session_cookie(
        token,
        !state.config.server.dev,
        state.config.auth.days,
    ));
    let reply = auth_reply(&state, &principal)?;
    Ok((jar, Json(reply)))
}

/// POST /api/auth/logout — destroy the presented session (idempotent) and
/// clear the cookie.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    session: MaybeSession,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    if let Some(token) = session.token.as_deref() {
        state.sessions.logout(token);
    }
    let jar = jar.add(clear_cookie(!state.config.server.dev));
    (jar, Json(serde_json::json!({ "status": "ok" })))
}

/// GET /api/auth/me — the session's user, 401 without one.
pub async fn me(
    State(state): State<Arc<AppState>>,
    session: AuthSession,
) -> Result<Json<AuthReply>, ApiError> {
    let reply = auth_reply(&state, &session.principal)?;
    Ok(Json(reply))
}

/// Run a KDF-heavy session operation on the blocking pool, capped by the
/// KDF semaphore.
async fn run_kdf<F>(state: &Arc<AppState>, f: F) -> Result<(String, Principal), ApiError>
where
    F: FnOnce(&arbiter_sessions::SessionManager) -> arbiter_core::error::Result<(String, Principal)>
        + Send
        + 'static,
{
    let dev = state.config.server.dev;
    let _permit = state
        .kdf_permits
        .acquire()
        .await
        .map_err(|_| ApiError::new(GatewayError::Internal("kdf pool closed".into()), dev))?;

    let sessions = Arc::clone(&state.sessions);
    tokio::task::spawn_blocking(move || f(&sessions))
        .await
        .map_err(|e| ApiError::new(GatewayError::Internal(e.to_string()), dev))?
        .map_err(|e| ApiError::new(e, dev))
}

fn auth_reply(state: &Arc<AppState>, principal: &Principal) -> Result<AuthReply, ApiError> {
    let dev = state.config.server.dev;
    let user = state
        .users
        .get(&principal.user_id)
        .map_err(|e| ApiError::new(GatewayError::Internal(e.to_string()), dev))?
        .ok_or_else(|| ApiError::new(GatewayError::AuthenticationRequired, dev))?;
    Ok(AuthReply {
        user: UserBody {
            id: user.id,
            email: user.email,
            tier: user.tier,
            email_verified: user.email_verified,
        },
    })
}

fn bad_body(state: &Arc<AppState>, rejection: JsonRejection) -> ApiError {
    ApiError::new(
        GatewayError::field("body", rejection.body_text()),
        state.config.server.dev,
    )
}
