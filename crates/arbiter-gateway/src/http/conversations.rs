//! Thread CRUD: list, fetch with content, rename, soft-delete.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use arbiter_conversations::{Conversation, ConversationError, ConversationSummary, Turn};
use arbiter_core::error::GatewayError;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extract::AuthSession;

#[derive(Serialize)]
pub struct ListReply {
    pub conversations: Vec<ConversationSummary>,
}

/// GET /api/conversations — active threads, newest activity first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    session: AuthSession,
) -> Result<Json<ListReply>, ApiError> {
    let conversations = state
        .conversations
        .list_active(&session.principal.user_id)
        .map_err(|e| internal(&state, e))?;
    Ok(Json(ListReply { conversations }))
}

#[derive(Serialize)]
pub struct ThreadReply {
    pub conversation: Conversation,
    pub turns: Vec<Turn>,
}

/// GET /api/conversations/{id} — one thread with its full turn content.
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    session: AuthSession,
    Path(id): Path<String>,
) -> Result<Json<ThreadReply>, ApiError> {
    let conversation = state
        .conversations
        .get(&id, &session.principal.user_id)
        .map_err(|e| not_found_or_internal(&state, e))?;
    let turns = state
        .conversations
        .load_turns(&conversation.id)
        .map_err(|e| internal(&state, e))?;
    Ok(Json(ThreadReply {
        conversation,
        turns,
    }))
}

#[derive(Deserialize)]
pub struct RenameBody {
    pub title: String,
}

/// PATCH /api/conversations/{id} — update the title.
pub async fn rename(
    State(state): State<Arc<AppState>>,
    session: AuthSession,
    Path(id): Path<String>,
    body: Result<Json<RenameBody>, JsonRejection>,
) -> Result<Json<ThreadReply>, ApiError> {
    let dev = state.config.server.dev;
    let Json(body) = body.map_err(|e| ApiError::new(GatewayError::field("body", e.body_text()), dev))?;

    let title = body.title.trim();
    if title.is_empty() {
        return Err(ApiError::new(
            GatewayError::field("title", "Title must not be empty"),
            dev,
        ));
    }
    if title.chars().count() > 200 {
        return Err(ApiError::new(
            GatewayError::field("title", "Title must be at most 200 characters"),
            dev,
        ));
    }

    state
        .conversations
        .set_title(&id, &session.principal.user_id, title)
        .map_err(|e| not_found_or_internal(&state, e))?;

    get_one(State(state), session, Path(id)).await
}

/// DELETE /api/conversations/{id} — soft delete; the thread vanishes from
/// every user-facing query, its turns stay for admin tooling.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    session: AuthSession,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .conversations
        .soft_delete(&id, &session.principal.user_id)
        .map_err(|e| not_found_or_internal(&state, e))?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

fn internal(state: &Arc<AppState>, e: ConversationError) -> ApiError {
    ApiError::new(
        GatewayError::Internal(e.to_string()),
        state.config.server.dev,
    )
}

fn not_found_or_internal(state: &Arc<AppState>, e: ConversationError) -> ApiError {
    match e {
        ConversationError::NotFound => {
            ApiError::new(GatewayError::NotFound, state.config.server.dev)
        }
        other => internal(state, other),
    }
}
