//! Durable multi-turn conversation state.
//!
//! Threads (`conversations`) and their append-only message log (`turns`).
//! The store enforces the token-ledger invariant: a turn insert and the
//! owning thread's counter updates happen in one transaction, so
//! `total_tokens` always equals the sum over the thread's successful turns.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{ConversationError, Result};
pub use store::{auto_title, ConversationStore};
pub use types::{Conversation, ConversationSummary, NewTurn, Turn, TurnMeta};
