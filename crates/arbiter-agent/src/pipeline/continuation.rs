//! Summarize-and-continue: when a thread saturates, digest it, archive it,
//! and seed a successor thread with the digest as carry-over context.

use tracing::{info, warn};

use arbiter_conversations::Conversation;
use arbiter_core::error::{GatewayError, Result};
use arbiter_core::types::Principal;
use arbiter_guard::sanitize::sanitize_output;

use crate::prompt::{system_prompt, SUMMARIZE_INSTRUCTION, SUMMARY_MAX_TOKENS, TEMPERATURE};
use crate::provider::{ChatRequest, Message, Role};
use crate::retry::send_with_retry;

use super::context::ChatContext;
use super::process::replay_history;

/// Run the continuation protocol against a saturated thread. Returns the
/// successor conversation the current turn should resume against.
///
/// The summarization call is billed to the user and the global bucket
/// exactly like a chat call.
pub(crate) async fn continue_saturated<C: ChatContext>(
    ctx: &C,
    principal: &Principal,
    conv: &Conversation,
) -> Result<Conversation> {
    let turns = ctx
        .conversations()
        .load_turns(&conv.id)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let mut messages = replay_history(&turns);
    messages.push(Message {
        role: Role::User,
        content: SUMMARIZE_INSTRUCTION.to_string(),
    });

    let req = ChatRequest {
        model: ctx.model().to_string(),
        system: system_prompt(None),
        messages,
        max_tokens: SUMMARY_MAX_TOKENS,
        temperature: TEMPERATURE,
    };

    let resp = send_with_retry(ctx.provider(), &req, ctx.upstream_deadline())
        .await
        .map_err(|e| {
            warn!(error = %e, conversation_id = %conv.id, "summarization call failed");
            GatewayError::UpstreamUnavailable
        })?;

    let tokens = u64::from(resp.input_tokens) + u64::from(resp.output_tokens);
    let cost = ctx
        .cost()
        .reconcile(resp.input_tokens, resp.output_tokens, ctx.model())
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    if let Err(e) = ctx.cost().record(cost, tokens, Some(&principal.user_id)) {
        warn!(error = %e, "summarization cost record failed");
    }
    if let Err(e) = ctx.ledger().add(&principal.user_id, tokens) {
        warn!(error = %e, "summarization ledger add failed");
    }

    let digest = sanitize_output(resp.content.trim());

    ctx.conversations()
        .archive(&conv.id)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let successor = ctx
        .conversations()
        .create(&principal.user_id, None, Some(&digest))
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    info!(
        archived = %conv.id,
        successor = %successor.id,
        digest_chars = digest.chars().count(),
        summary_tokens = tokens,
        "thread saturated, continued into successor"
    );
    Ok(successor)
}
