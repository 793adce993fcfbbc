//! Bounded retry with jittered back-off under a hard total deadline.
//!
//! The deadline covers every attempt and every back-off sleep — a slow
//! upstream cannot stretch a turn past the configured ceiling.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// Transient failures are retried at most this many times.
pub const MAX_RETRIES: u32 = 2;

const BACKOFF_BASE_MS: u64 = 250;
const JITTER_MS: u64 = 250;

/// Send with ≤2 retries on transient errors and a hard total deadline.
pub async fn send_with_retry(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    deadline: Duration,
) -> Result<ChatResponse, ProviderError> {
    let started = Instant::now();
    let deadline_err = || ProviderError::DeadlineExceeded {
        secs: deadline.as_secs(),
    };

    let mut attempt: u32 = 0;
    loop {
        let remaining = deadline
            .checked_sub(started.elapsed())
            .ok_or_else(deadline_err)?;

        match tokio::time::timeout(remaining, provider.send(req)).await {
            Err(_) => return Err(deadline_err()),
            Ok(Ok(resp)) => return Ok(resp),
            Ok(Err(e)) if e.is_transient() && attempt < MAX_RETRIES => {
                attempt += 1;
                let base = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
                let mut delay = Duration::from_millis(base + jitter);
                if let ProviderError::RateLimited { retry_after_ms } = &e {
                    delay = delay.max(Duration::from_millis(*retry_after_ms));
                }
                let remaining = deadline
                    .checked_sub(started.elapsed())
                    .ok_or_else(deadline_err)?;
                if delay >= remaining {
                    return Err(deadline_err());
                }
                warn!(
                    provider = provider.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient upstream error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Ok(Err(e)) => return Err(e),
        }
    }
}
