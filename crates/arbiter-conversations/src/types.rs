use serde::{Deserialize, Serialize};

/// A conversation thread. `archived_at` and `deleted_at` are distinct:
/// archived threads are hidden from the active list but kept as the source
/// of a carry-over summary; deleted threads are gone from every non-admin
/// query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    /// Sum of `tokens_used` over the thread's successful turns — maintained
    /// by the store, never written by callers.
    pub total_tokens: u64,
    /// Compact digest of a prior archived thread, replayed as system
    /// context instead of that thread's messages.
    pub summary_context: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_message_at: String,
    pub deleted_at: Option<String>,
    pub archived_at: Option<String>,
}

/// Active-list row: the thread plus the display fields the sidebar needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub message_count: u64,
    pub last_message_preview: Option<String>,
}

/// One persisted (user message, assistant response) pair — or a failed
/// attempt. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub user_message: String,
    pub assistant_response: Option<String>,
    pub message_length: u32,
    pub response_length: Option<u32>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub tokens_used: Option<u32>,
    pub actual_cost_millicents: Option<u64>,
    /// JSON array of tool names, when the upstream call used any.
    pub tools_used: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub created_at: String,
}

/// Everything needed to persist a turn. The store assigns id and timestamp.
#[derive(Debug, Clone, Default)]
pub struct NewTurn {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub user_message: String,
    pub assistant_response: Option<String>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub tokens_used: Option<u32>,
    pub actual_cost_millicents: Option<u64>,
    pub tools_used: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

/// Turn metadata without message content, for history listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMeta {
    pub id: String,
    pub conversation_id: Option<String>,
    pub message_length: u32,
    pub response_length: Option<u32>,
    pub tokens_used: Option<u32>,
    pub actual_cost_millicents: Option<u64>,
    pub success: bool,
    pub duration_ms: u64,
    pub created_at: String,
}
