//! The ordered admission chain for a chat request.
//!
//! Full documented order: IP limiter → session resolve → tier request-count
//! limiter → tier token budget → global budget gate → schema validation.
//! The first two live at the HTTP layer (middleware and cookie extractor);
//! the remaining four are the stage list here, encoded as plain function
//! values run in sequence — cheap KV checks first, row-store reads after,
//! nothing that touches the upstream.
//!
//! Pre-flight checks are advisory: concurrent requests may observe counters
//! that are one in-flight request stale. The post-flight `record`/`add`
//! pass is authoritative.

use arbiter_core::config::MESSAGE_MAX_CHARS;
use arbiter_core::error::{GatewayError, RateScope, Result};
use arbiter_core::types::{Principal, TierLimits};
use arbiter_cost::{CostEngine, TokenLedger};
use arbiter_kv::KvStore;
use tracing::debug;

use crate::limits::{next_midnight_rfc3339, seconds_to_midnight};

/// Ledger subject for quota accounting: the user id, or a per-IP pseudo
/// subject for anonymous traffic so anonymous budgets still bind.
pub fn ledger_subject(principal: Option<&Principal>, client_ip: &str) -> String {
    match principal {
        Some(p) => p.user_id.clone(),
        None => format!("anon:{client_ip}"),
    }
}

/// Everything the stages read, plus the report they fill in.
pub struct StageCx<'a> {
    pub message: &'a str,
    pub principal: Option<&'a Principal>,
    pub client_ip: &'a str,
    pub limits: TierLimits,
    pub tier_name: &'static str,
    pub kv: &'a KvStore,
    pub ledger: &'a TokenLedger,
    pub engine: &'a CostEngine,
    pub model: &'a str,
    pub report: AdmissionReport,
}

/// Numbers the HTTP layer needs for response headers, plus the validated
/// message the orchestrator receives.
#[derive(Debug, Clone, Default)]
pub struct AdmissionReport {
    pub request_limit: u64,
    pub request_remaining: u64,
    pub reset_at: String,
    pub tokens_limit: u64,
    pub tokens_used: u64,
    pub tokens_remaining: u64,
    /// Trimmed message, produced by the validation stage.
    pub message: String,
}

type Stage = fn(&mut StageCx<'_>) -> Result<()>;

/// The stage list, in the order it runs.
pub const CHAIN: &[(&str, Stage)] = &[
    ("request_quota", request_quota),
    ("token_budget", token_budget),
    ("global_budget", global_budget),
    ("validate", validate_message),
];

/// Run every stage in order; the first failure short-circuits.
pub fn run_chain(mut cx: StageCx<'_>) -> Result<AdmissionReport> {
    for (name, stage) in CHAIN {
        if let Err(e) = stage(&mut cx) {
            debug!(stage = name, "admission rejected");
            return Err(e);
        }
    }
    Ok(cx.report)
}

/// Per-day request-count quota for the tier. The counter increment is the
/// admission itself, so failed turns downstream still consumed a slot.
fn request_quota(cx: &mut StageCx<'_>) -> Result<()> {
    let key = match cx.principal {
        Some(p) => format!("rl_user_{}:{}", cx.tier_name, p.user_id),
        None => format!("rl_anon:{}", cx.client_ip),
    };
    let ttl = std::time::Duration::from_secs(seconds_to_midnight());
    let count = cx
        .kv
        .incr_by(&key, 1, ttl)
        .map_err(|e| GatewayError::Internal(e.to_string()))? as u64;

    let limit = cx.limits.requests_per_day;
    cx.report.request_limit = limit;
    cx.report.reset_at = next_midnight_rfc3339();

    if count > limit {
        return Err(GatewayError::RateLimited {
            scope: RateScope::Requests,
            retry_after_secs: seconds_to_midnight(),
            limit,
            remaining: 0,
            reset_at: cx.report.reset_at.clone(),
        });
    }
    cx.report.request_remaining = limit - count;
    Ok(())
}

/// Tier token budget, checked against the authoritative user-day ledger
/// with a pessimistic estimate for this request.
fn token_budget(cx: &mut StageCx<'_>) -> Result<()> {
    let subject = ledger_subject(cx.principal, cx.client_ip);
    let used = cx
        .ledger
        .usage_today(&subject)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let estimated_input = (cx.message.chars().count() as u64).div_ceil(4);
    let estimated_total = estimated_input + u64::from(cx.limits.max_output_tokens);
    let limit = cx.limits.tokens_per_day;

    cx.report.tokens_limit = limit;
    cx.report.tokens_used = used;
    cx.report.tokens_remaining = limit.saturating_sub(used);

    if used + estimated_total > limit {
        return Err(GatewayError::RateLimited {
            scope: RateScope::Tokens,
            retry_after_secs: seconds_to_midnight(),
            limit,
            remaining: limit.saturating_sub(used),
            reset_at: next_midnight_rfc3339(),
        });
    }
    Ok(())
}

/// Process-wide budget gate: 503 the moment today's spend plus this
/// request's estimate would cross the ceiling. No queueing.
fn global_budget(cx: &mut StageCx<'_>) -> Result<()> {
    let estimate = cx
        .engine
        .estimate(
            cx.message.chars().count(),
            cx.limits.max_output_tokens,
            cx.model,
        )
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    let affordable = cx
        .engine
        .can_afford(estimate)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    if !affordable {
        return Err(GatewayError::BudgetExceeded {
            reset_at: next_midnight_rfc3339(),
        });
    }
    Ok(())
}

/// Schema validation: trimmed length in [1, 4000]. Runs last — by the time
/// a request pays for validation it has already cleared every quota.
fn validate_message(cx: &mut StageCx<'_>) -> Result<()> {
    let trimmed = cx.message.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(GatewayError::field("message", "Message must not be empty"));
    }
    if len > MESSAGE_MAX_CHARS {
        return Err(GatewayError::field(
            "message",
            format!("Message must be at most {MESSAGE_MAX_CHARS} characters"),
        ));
    }
    cx.report.message = trimmed.to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;

    use arbiter_core::types::{Tier, TierTable};
    use arbiter_cost::{BudgetAlerts, LogAlertSink, PriceTable, UsageStore};

    struct Fixture {
        kv: Arc<KvStore>,
        ledger: TokenLedger,
        engine: CostEngine,
        tiers: TierTable,
    }

    fn fixture(budget: u64) -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        arbiter_cost::db::init_db(&conn).unwrap();
        let usage = Arc::new(UsageStore::new(Arc::new(Mutex::new(conn))));
        let kv = Arc::new(KvStore::new());
        let alerts = BudgetAlerts::new(Arc::clone(&kv), vec![50], Box::new(LogAlertSink));
        Fixture {
            kv,
            ledger: TokenLedger::new(Arc::clone(&usage)),
            engine: CostEngine::new(PriceTable::builtin(), usage, alerts, budget),
            tiers: TierTable::default(),
        }
    }

    fn run(f: &Fixture, message: &str, principal: Option<&Principal>) -> Result<AdmissionReport> {
        let tier = principal.map(|p| p.tier).unwrap_or(Tier::Anonymous);
        run_chain(StageCx {
            message,
            principal,
            client_ip: "203.0.113.9",
            limits: *f.tiers.limits(tier),
            tier_name: tier.as_str(),
            kv: &f.kv,
            ledger: &f.ledger,
            engine: &f.engine,
            model: "claude-sonnet-4-6",
            report: AdmissionReport::default(),
        })
    }

    #[test]
    fn anonymous_gets_three_requests_per_day() {
        let f = fixture(1_000_000);
        for i in 0..3 {
            let report = run(&f, "Hi", None).unwrap();
            assert_eq!(report.request_limit, 3);
            assert_eq!(report.request_remaining, 2 - i);
        }
        let err = run(&f, "Hi", None).unwrap_err();
        match err {
            GatewayError::RateLimited {
                scope,
                retry_after_secs,
                ..
            } => {
                assert_eq!(scope, RateScope::Requests);
                assert!(retry_after_secs > 0);
            }
            other => panic!("expected day quota, got {other:?}"),
        }
    }

    #[test]
    fn token_budget_rejects_when_day_is_spent() {
        let f = fixture(1_000_000);
        let p = Principal {
            user_id: "u1".into(),
            email: "a@b.co".into(),
            tier: Tier::Free,
        };
        // Free tier: 100k/day, max_output 2k. Burn 98_001 -> estimate
        // (1 + 2000) no longer fits.
        f.ledger.add("u1", 98_001).unwrap();
        let err = run(&f, "Hi", Some(&p)).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::RateLimited {
                scope: RateScope::Tokens,
                ..
            }
        ));
        // Exactly at the boundary passes.
        let f2 = fixture(1_000_000);
        f2.ledger.add("u1", 97_999).unwrap();
        assert!(run(&f2, "Hi", Some(&p)).is_ok());
    }

    #[test]
    fn global_budget_gate_closes() {
        let f = fixture(10);
        f.engine.record(10, 100, None).unwrap();
        let err = run(&f, "Hi", None).unwrap_err();
        assert!(matches!(err, GatewayError::BudgetExceeded { .. }));
    }

    #[test]
    fn validation_bounds_after_trim() {
        let f = fixture(1_000_000);
        assert!(matches!(
            run(&f, "   ", None).unwrap_err(),
            GatewayError::Validation { .. }
        ));
        let too_long = "x".repeat(4001);
        assert!(matches!(
            run(&f, &too_long, None).unwrap_err(),
            GatewayError::Validation { .. }
        ));
        let f2 = fixture(1_000_000);
        let exactly = "x".repeat(4000);
        let report = run(&f2, &exactly, None).unwrap();
        assert_eq!(report.message.chars().count(), 4000);
    }

    #[test]
    fn quota_burns_even_when_validation_fails() {
        // Order matters: quota stages run before the schema validator.
        let f = fixture(1_000_000);
        for _ in 0..3 {
            let _ = run(&f, "   ", None);
        }
        let err = run(&f, "Hi", None).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::RateLimited {
                scope: RateScope::Requests,
                ..
            }
        ));
    }
}
