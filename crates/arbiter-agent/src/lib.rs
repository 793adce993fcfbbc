//! Upstream LLM access and the chat-turn orchestrator.
//!
//! The provider half is a thin trait over the completion API with bounded
//! retries and a hard deadline. The pipeline half runs the documented turn:
//! screen → thread resolution → history → prompt → call → sanitize →
//! reconcile → persist → auto-title, plus the summarize-and-continue
//! protocol for saturated threads.

pub mod anthropic;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod retry;
pub mod testing;

pub use anthropic::AnthropicProvider;
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role};
