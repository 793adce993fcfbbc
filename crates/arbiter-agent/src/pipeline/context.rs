use std::time::Duration;

use arbiter_conversations::ConversationStore;
use arbiter_core::types::TierTable;
use arbiter_cost::{CostEngine, TokenLedger};

use crate::provider::LlmProvider;

/// Host context the pipeline runs against — implemented by the gateway's
/// `AppState`, and by hand-built fixtures in tests. Keeps the pipeline free
/// of any knowledge of HTTP or process wiring.
pub trait ChatContext: Send + Sync {
    fn provider(&self) -> &dyn LlmProvider;
    fn conversations(&self) -> &ConversationStore;
    fn cost(&self) -> &CostEngine;
    fn ledger(&self) -> &TokenLedger;
    fn tiers(&self) -> &TierTable;

    /// Model identifier sent upstream for every call.
    fn model(&self) -> &str;

    /// Hard ceiling for one upstream call including retries.
    fn upstream_deadline(&self) -> Duration;

    /// Cumulative-token cap per thread before summarize-and-continue.
    fn saturation_limit(&self) -> u64;
}
