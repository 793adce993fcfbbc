//! The chat turn, start to finish.
//!
//! Admission has already run: the message arrived validated and within
//! bounds. Everything that can still fail here produces a `success=false`
//! turn row before the error goes back to the HTTP layer.

use std::time::Instant;

use tracing::{info, warn};

use arbiter_conversations::{auto_title, Conversation, NewTurn, Turn};
use arbiter_core::error::{GatewayError, Result};
use arbiter_core::types::{Principal, Tier};
use arbiter_guard::chain::ledger_subject;
use arbiter_guard::sanitize::{sanitize_input, sanitize_output};
use arbiter_guard::screen::{screen, Screening};

use crate::prompt::{system_prompt, TEMPERATURE};
use crate::provider::{ChatRequest, Message, Role};
use crate::retry::send_with_retry;

use super::context::ChatContext;
use super::continuation::continue_saturated;

/// What a completed turn hands back to the HTTP layer.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub conversation_id: Option<String>,
    pub tokens_used: u32,
    pub cost_millicents: u64,
    pub model: String,
}

/// Replayable history: successful turns only, as alternating user/assistant
/// messages in chronological order.
pub(crate) fn replay_history(turns: &[Turn]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(turns.len() * 2);
    for turn in turns {
        let response = match (&turn.assistant_response, turn.success) {
            (Some(r), true) => r,
            _ => continue,
        };
        messages.push(Message {
            role: Role::User,
            content: turn.user_message.clone(),
        });
        messages.push(Message {
            role: Role::Assistant,
            content: response.clone(),
        });
    }
    messages
}

/// Run one chat turn for an (optionally anonymous) principal.
///
/// Steps: screen → thread resolution (+ saturation continuation) → history
/// load → prompt composition → upstream call → output sanitize → reconcile
/// and persist → auto-title → outcome.
pub async fn process_chat_turn<C: ChatContext>(
    ctx: &C,
    principal: Option<&Principal>,
    message: &str,
    conversation_id: Option<&str>,
    session_id: Option<&str>,
    client_ip: &str,
) -> Result<TurnOutcome> {
    let started = Instant::now();
    let tier = principal.map(|p| p.tier).unwrap_or(Tier::Anonymous);
    let user_id = principal.map(|p| p.user_id.clone());

    // 1. Screen the raw message. A reject is terminal and recorded.
    if let Screening::Reject {
        family,
        matched_pattern,
    } = screen(message)
    {
        warn!(
            family = family.as_str(),
            pattern = matched_pattern,
            "injection screen reject"
        );
        record_failure(
            ctx,
            NewTurn {
                user_id: user_id.clone(),
                session_id: session_id.map(String::from),
                conversation_id: None,
                user_message: message.to_string(),
                error_message: Some(format!("injection: {}", family.as_str())),
                duration_ms: started.elapsed().as_millis() as u64,
                ..NewTurn::default()
            },
        );
        return Err(GatewayError::InvalidRequestDetected {
            family: family.as_str().to_string(),
        });
    }

    // 2. Thread resolution. Anonymous turns have no thread.
    let mut conversation: Option<Conversation> = match (principal, conversation_id) {
        (Some(p), Some(id)) => Some(resolve_owned(ctx, id, &p.user_id)?),
        (Some(p), None) => Some(
            ctx.conversations()
                .create(&p.user_id, None, None)
                .map_err(|e| GatewayError::Internal(e.to_string()))?,
        ),
        (None, _) => None,
    };

    // Saturation check happens before the upstream call: a saturated thread
    // is digested and the turn resumes against the successor.
    let saturated = conversation
        .as_ref()
        .map(|c| c.total_tokens >= ctx.saturation_limit())
        .unwrap_or(false);
    if saturated {
        let p = principal.expect("saturated thread implies a principal");
        let conv = conversation.take().expect("checked above");
        match continue_saturated(ctx, p, &conv).await {
            Ok(successor) => conversation = Some(successor),
            Err(e) => {
                record_failure(
                    ctx,
                    NewTurn {
                        user_id: user_id.clone(),
                        session_id: session_id.map(String::from),
                        conversation_id: Some(conv.id.clone()),
                        user_message: message.to_string(),
                        error_message: Some("summarization failed".to_string()),
                        duration_ms: started.elapsed().as_millis() as u64,
                        ..NewTurn::default()
                    },
                );
                return Err(e);
            }
        }
    }

    // 3. History load (failure turns skipped in replay).
    let history = match conversation.as_ref() {
        Some(conv) => replay_history(
            &ctx.conversations()
                .load_turns(&conv.id)
                .map_err(|e| GatewayError::Internal(e.to_string()))?,
        ),
        None => Vec::new(),
    };

    // 4. Prompt composition: topic prompt, carry-over summary, then the
    // sanitized current message.
    let sanitized = sanitize_input(message);
    let system = system_prompt(
        conversation
            .as_ref()
            .and_then(|c| c.summary_context.as_deref()),
    );
    let mut messages = history;
    messages.push(Message {
        role: Role::User,
        content: sanitized.clone(),
    });

    // 5. Upstream call under the tier's output cap and the hard deadline.
    let request = ChatRequest {
        model: ctx.model().to_string(),
        system,
        messages,
        max_tokens: ctx.tiers().limits(tier).max_output_tokens,
        temperature: TEMPERATURE,
    };

    let response = match send_with_retry(ctx.provider(), &request, ctx.upstream_deadline()).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "upstream call failed; persisting failure turn");
            record_failure(
                ctx,
                NewTurn {
                    user_id: user_id.clone(),
                    session_id: session_id.map(String::from),
                    conversation_id: conversation.as_ref().map(|c| c.id.clone()),
                    user_message: sanitized.clone(),
                    error_message: Some(format!("upstream: {e}")),
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..NewTurn::default()
                },
            );
            return Err(GatewayError::UpstreamUnavailable);
        }
    };

    // 6. Output sanitize.
    let clean = sanitize_output(&response.content);

    // 7. Reconcile and persist. The upstream call happened, so accounting
    // failures from here on are logged, retried once, and never undo the
    // user's response.
    let tokens_used = response.input_tokens + response.output_tokens;
    let cost = ctx
        .cost()
        .reconcile(response.input_tokens, response.output_tokens, ctx.model())
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    best_effort("cost record", || {
        ctx.cost()
            .record(cost, u64::from(tokens_used), user_id.as_deref())
            .map_err(|e| e.to_string())
    });
    let subject = ledger_subject(principal, client_ip);
    best_effort("ledger add", || {
        ctx.ledger()
            .add(&subject, u64::from(tokens_used))
            .map_err(|e| e.to_string())
    });
    best_effort("turn persist", || {
        ctx.conversations()
            .record_turn(NewTurn {
                user_id: user_id.clone(),
                session_id: session_id.map(String::from),
                conversation_id: conversation.as_ref().map(|c| c.id.clone()),
                user_message: sanitized.clone(),
                assistant_response: Some(clean.clone()),
                input_tokens: Some(response.input_tokens),
                output_tokens: Some(response.output_tokens),
                tokens_used: Some(tokens_used),
                actual_cost_millicents: Some(cost),
                success: true,
                duration_ms: started.elapsed().as_millis() as u64,
                ..NewTurn::default()
            })
            .map(|_| ())
            .map_err(|e| e.to_string())
    });

    // 8. Auto-title on the thread's first successful turn.
    if let (Some(p), Some(conv)) = (principal, conversation.as_ref()) {
        if conv.title.is_none() {
            if let Err(e) = ctx
                .conversations()
                .set_title(&conv.id, &p.user_id, &auto_title(&sanitized))
            {
                warn!(error = %e, "auto-title failed");
            }
        }
    }

    info!(
        tokens = tokens_used,
        cost_millicents = cost,
        model = %response.model,
        duration_ms = started.elapsed().as_millis() as u64,
        "chat turn complete"
    );

    // 9. Respond with the live conversation id.
    Ok(TurnOutcome {
        response: clean,
        conversation_id: conversation.map(|c| c.id),
        tokens_used,
        cost_millicents: cost,
        model: response.model,
    })
}

fn resolve_owned<C: ChatContext>(ctx: &C, id: &str, user_id: &str) -> Result<Conversation> {
    use arbiter_conversations::ConversationError;
    match ctx.conversations().get(id, user_id) {
        Ok(c) => Ok(c),
        Err(ConversationError::NotFound) => Err(GatewayError::NotFound),
        Err(e) => Err(GatewayError::Internal(e.to_string())),
    }
}

/// Post-LLM bookkeeping: one in-process retry, then log and move on.
fn best_effort(what: &str, f: impl Fn() -> std::result::Result<(), String>) {
    if f().is_ok() {
        return;
    }
    if let Err(e) = f() {
        warn!(what, error = %e, "best-effort write failed after retry");
    }
}

/// Failure turns are themselves best-effort — an audit row must never turn
/// a failure into a 500-with-no-record.
fn record_failure<C: ChatContext>(ctx: &C, turn: NewTurn) {
    if let Err(e) = ctx.conversations().record_turn(turn) {
        warn!(error = %e, "failed to persist failure turn");
    }
}
