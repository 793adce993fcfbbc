use std::sync::Arc;

use crate::error::Result;
use crate::today;
use crate::usage::UsageStore;

/// Per-user-per-day token accounting, read by the admission chain and
/// written once per successful turn. Idempotence contract: the orchestrator
/// calls `add` exactly once per successful turn, after reconciliation.
pub struct TokenLedger {
    usage: Arc<UsageStore>,
}

impl TokenLedger {
    pub fn new(usage: Arc<UsageStore>) -> Self {
        Self { usage }
    }

    /// Atomic upsert on (user, today): tokens += `tokens`, requests += 1.
    pub fn add(&self, user_id: &str, tokens: u64) -> Result<()> {
        self.usage.add_user(user_id, &today(), tokens)
    }

    /// Tokens consumed today — the admission chain's token-budget input.
    pub fn usage_today(&self, user_id: &str) -> Result<u64> {
        Ok(self.usage.user_day(user_id, &today())?.0)
    }

    /// Successful requests recorded today.
    pub fn requests_today(&self, user_id: &str) -> Result<u64> {
        Ok(self.usage.user_day(user_id, &today())?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use rusqlite::Connection;

    #[test]
    fn add_then_read_today() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let usage = Arc::new(UsageStore::new(Arc::new(Mutex::new(conn))));
        let ledger = TokenLedger::new(usage);
        ledger.add("u1", 250).unwrap();
        ledger.add("u1", 250).unwrap();
        assert_eq!(ledger.usage_today("u1").unwrap(), 500);
        assert_eq!(ledger.requests_today("u1").unwrap(), 2);
        assert_eq!(ledger.usage_today("stranger").unwrap(), 0);
    }
}
