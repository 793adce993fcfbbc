//! Scripted provider for tests — no network, deterministic token counts.
//!
//! Lives in the library (not behind `cfg(test)`) so downstream crates can
//! drive the full pipeline against it in their own tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// Returns queued replies in order (the last one repeats), with optional
/// scripted failures and latency. Token counts are derived from the
/// request/response lengths so billing math stays exercised: input tokens =
/// ⌈total message chars / 4⌉, output tokens = reply chars.
pub struct StubProvider {
    replies: Mutex<Vec<String>>,
    calls: AtomicUsize,
    fail_first: AtomicUsize,
    fail_status: u16,
    latency: Option<Duration>,
    /// Fixed output-token override; `None` derives from reply length.
    output_tokens: Option<u32>,
}

impl StubProvider {
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
            fail_status: 500,
            latency: None,
            output_tokens: None,
        }
    }

    /// Fail the first `n` calls with the given upstream status.
    pub fn failing_first(self, n: usize, status: u16) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        Self {
            fail_status: status,
            ..self
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..self
        }
    }

    pub fn with_output_tokens(self, tokens: u32) -> Self {
        Self {
            output_tokens: Some(tokens),
            ..self
        }
    }

    /// Total calls observed — the "no upstream call was made" assertions.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Api {
                status: self.fail_status,
                message: "scripted failure".to_string(),
            });
        }

        let content = {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop().unwrap()
            } else {
                replies.last().cloned().unwrap_or_default()
            }
        };

        let input_chars: usize = req.messages.iter().map(|m| m.content.chars().count()).sum();
        let input_tokens = (input_chars as u32).div_ceil(4).max(1);
        let output_tokens = self
            .output_tokens
            .unwrap_or_else(|| content.chars().count() as u32);

        Ok(ChatResponse {
            content,
            model: req.model.clone(),
            input_tokens,
            output_tokens,
            stop_reason: "end_turn".to_string(),
        })
    }
}
