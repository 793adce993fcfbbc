//! The chat turn endpoint plus the per-user history and stats reads.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue};
use axum::Json;
use serde::{Deserialize, Serialize};

use arbiter_agent::pipeline::{process_chat_turn, ChatContext};
use arbiter_core::error::GatewayError;
use arbiter_core::types::{Tier, TierLimits};
use arbiter_guard::chain::{run_chain, AdmissionReport, StageCx};

use crate::app::AppState;
use crate::error::{
    ApiError, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET, X_TOKENS_LIMIT,
    X_TOKENS_REMAINING, X_TOKENS_USED,
};
use crate::extract::{session_hint, AuthSession, ClientIp, MaybeSession};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub conversation_id: Option<String>,
    pub metadata: ChatMetadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    pub tokens_used: u32,
    pub model: String,
    pub cost_cents: u64,
}

/// POST /api/chat — the full admission chain, then the orchestrated turn.
///
/// Chain order on this route: the IP limiter already ran in middleware and
/// the session resolved via the extractor; here the remaining stages run
/// (request quota → token budget → global budget → schema validation)
/// before the pipeline touches any history or the upstream.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    session: MaybeSession,
    ClientIp(ip): ClientIp,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<([(HeaderName, HeaderValue); 6], Json<ChatReply>), ApiError> {
    let dev = state.config.server.dev;
    let Json(body) = body.map_err(|e| {
        ApiError::new(GatewayError::field("body", e.body_text()), dev)
    })?;

    let principal = session.principal;
    let tier = principal.as_ref().map(|p| p.tier).unwrap_or(Tier::Anonymous);
    let limits: TierLimits = *state.config.tiers.limits(tier);

    let report = run_chain(StageCx {
        message: &body.message,
        principal: principal.as_ref(),
        client_ip: &ip,
        limits,
        tier_name: tier.as_str(),
        kv: &state.kv,
        ledger: &state.ledger,
        engine: &state.cost,
        model: state.model(),
        report: AdmissionReport::default(),
    })
    .map_err(|e| ApiError::new(e, dev))?;

    let hint = session.token.as_deref().map(session_hint);
    let outcome = process_chat_turn(
        state.as_ref(),
        principal.as_ref(),
        &report.message,
        body.conversation_id.as_deref(),
        hint.as_deref(),
        &ip,
    )
    .await
    .map_err(|e| ApiError::new(e, dev))?;

    let tokens_after = report.tokens_used + u64::from(outcome.tokens_used);
    let headers = [
        (X_RATELIMIT_LIMIT, num(report.request_limit)),
        (X_RATELIMIT_REMAINING, num(report.request_remaining)),
        (X_RATELIMIT_RESET, text(&report.reset_at)),
        (X_TOKENS_LIMIT, num(report.tokens_limit)),
        (X_TOKENS_USED, num(tokens_after)),
        (
            X_TOKENS_REMAINING,
            num(report.tokens_limit.saturating_sub(tokens_after)),
        ),
    ];

    let reply = ChatReply {
        response: outcome.response,
        conversation_id: outcome.conversation_id,
        metadata: ChatMetadata {
            tokens_used: outcome.tokens_used,
            model: outcome.model,
            // Millicents are 1/1000 of a cent; any nonzero cost bills a cent.
            cost_cents: outcome.cost_millicents.div_ceil(1_000),
        },
    };
    Ok((headers, Json(reply)))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryReply {
    pub turns: Vec<arbiter_conversations::TurnMeta>,
}

/// GET /api/chat/history?limit=N — recent turn metadata, no content.
pub async fn history(
    State(state): State<Arc<AppState>>,
    session: AuthSession,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryReply>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let turns = state
        .conversations
        .history(&session.principal.user_id, limit)
        .map_err(|e| {
            ApiError::new(
                GatewayError::Internal(e.to_string()),
                state.config.server.dev,
            )
        })?;
    Ok(Json(HistoryReply { turns }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReply {
    pub today_requests: u64,
    pub success_rate: f64,
    pub tier: Tier,
}

/// GET /api/chat/stats — today's attempt count and success rate.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    session: AuthSession,
) -> Result<Json<StatsReply>, ApiError> {
    let day = arbiter_cost::today();
    let (attempts, successes) = state
        .conversations
        .day_stats(&session.principal.user_id, &day)
        .map_err(|e| {
            ApiError::new(
                GatewayError::Internal(e.to_string()),
                state.config.server.dev,
            )
        })?;
    let success_rate = if attempts == 0 {
        1.0
    } else {
        successes as f64 / attempts as f64
    };
    Ok(Json(StatsReply {
        today_requests: attempts,
        success_rate,
        tier: session.principal.tier,
    }))
}

fn num(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).expect("digits are a valid header value")
}

fn text(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}
