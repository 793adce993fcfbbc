//! The chat-turn pipeline, shared by every route that produces a turn.

pub mod context;
pub mod continuation;
pub mod process;

pub use context::ChatContext;
pub use process::{process_chat_turn, TurnOutcome};
