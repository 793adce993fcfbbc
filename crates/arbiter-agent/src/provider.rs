use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Request to the upstream completion API.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Non-streaming upstream response with the exact token counts the billing
/// path reconciles against.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: String,
}

/// Common interface for completion providers. One implementation talks to
/// the real upstream; tests script their own.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a chat request and wait for the full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request deadline of {secs}s exceeded")]
    DeadlineExceeded { secs: u64 },
}

impl ProviderError {
    /// Transient failures are worth a bounded retry; everything else fails
    /// the turn immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::RateLimited { .. } => true,
            ProviderError::Parse(_) => false,
            ProviderError::DeadlineExceeded { .. } => false,
        }
    }
}
