//! Monetary cost accounting and token quotas.
//!
//! Everything monetary is integer millicents (1/100 000 of a dollar),
//! rounded up on conversion — no float drift in billing paths. The engine
//! estimates before the upstream call, reconciles exactly after it, keeps
//! the global and per-user day buckets, and fires each budget threshold
//! alert at most once per day.

pub mod alerts;
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod pricing;
pub mod usage;

pub use alerts::{AlertSink, BudgetAlerts, LogAlertSink};
pub use engine::CostEngine;
pub use error::{CostError, Result};
pub use ledger::TokenLedger;
pub use pricing::PriceTable;
pub use usage::{GlobalDay, UsageStore};

/// UTC calendar day used by every bucket, `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
