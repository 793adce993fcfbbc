use std::sync::Arc;

use tracing::debug;

use crate::alerts::BudgetAlerts;
use crate::error::Result;
use crate::pricing::PriceTable;
use crate::today;
use crate::usage::UsageStore;

/// The cost subsystem facade the orchestrator and admission chain talk to:
/// estimate → gate → reconcile → record → alert.
pub struct CostEngine {
    prices: PriceTable,
    usage: Arc<UsageStore>,
    alerts: BudgetAlerts,
    daily_budget_millicents: u64,
}

impl CostEngine {
    pub fn new(
        prices: PriceTable,
        usage: Arc<UsageStore>,
        alerts: BudgetAlerts,
        daily_budget_millicents: u64,
    ) -> Self {
        Self {
            prices,
            usage,
            alerts,
            daily_budget_millicents,
        }
    }

    pub fn daily_budget(&self) -> u64 {
        self.daily_budget_millicents
    }

    /// Pre-flight worst-case cost for a message under the tier's output cap.
    pub fn estimate(&self, message_len: usize, max_output: u32, model: &str) -> Result<u64> {
        self.prices.estimate(message_len, max_output, model)
    }

    /// Exact cost from upstream-reported token counts.
    pub fn reconcile(&self, input_tokens: u32, output_tokens: u32, model: &str) -> Result<u64> {
        self.prices.reconcile(input_tokens, output_tokens, model)
    }

    /// Budget gate predicate: would spending `estimate` keep today under
    /// the global ceiling?
    pub fn can_afford(&self, estimate: u64) -> Result<bool> {
        let spent = self.usage.global_day(&today())?.total_cost_millicents;
        Ok(spent + estimate <= self.daily_budget_millicents)
    }

    /// Authoritative post-flight accounting: upsert the global day bucket
    /// (and `unique_users` on a user's first successful turn today), then
    /// run the threshold alerts against the new total.
    pub fn record(&self, cost_millicents: u64, tokens: u64, user_id: Option<&str>) -> Result<()> {
        let day = today();
        self.usage.record(&day, cost_millicents, tokens, user_id)?;
        let spent = self.usage.global_day(&day)?.total_cost_millicents;
        debug!(cost_millicents, tokens, spent, "cost recorded");
        self.alerts.check(&day, spent, self.daily_budget_millicents);
        Ok(())
    }
}
