//! KV-backed rate limiting primitives: the rolling per-IP window and the
//! day-window helpers the quota stages share.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};

use arbiter_core::error::{GatewayError, RateScope, Result};
use arbiter_kv::KvStore;

const IP_WINDOW: Duration = Duration::from_secs(60);

/// Seconds until the next UTC midnight — the TTL for per-day counters and
/// the Retry-After for day-quota rejections.
pub fn seconds_to_midnight() -> u64 {
    let now = Utc::now();
    let tomorrow = (now + ChronoDuration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists");
    (tomorrow.and_utc() - now).num_seconds().max(1) as u64
}

/// RFC3339 instant of the next UTC midnight.
pub fn next_midnight_rfc3339() -> String {
    let tomorrow = (Utc::now() + ChronoDuration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists");
    tomorrow.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Rolling window limiter on the source address: at most `per_minute`
/// requests per 60 s per IP, across every route it is applied to.
pub fn check_ip(kv: &KvStore, ip: &str, per_minute: u64) -> Result<()> {
    let key = format!("rl_ip:{ip}");
    let count = kv
        .incr_by(&key, 1, IP_WINDOW)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    if count as u64 > per_minute {
        let retry = kv
            .ttl(&key)
            .map(|d| d.as_secs().max(1))
            .unwrap_or(IP_WINDOW.as_secs());
        return Err(GatewayError::RateLimited {
            scope: RateScope::Ip,
            retry_after_secs: retry,
            limit: per_minute,
            remaining: 0,
            reset_at: (Utc::now() + ChronoDuration::seconds(retry as i64))
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_window_allows_then_blocks() {
        let kv = KvStore::new();
        for _ in 0..10 {
            check_ip(&kv, "10.0.0.1", 10).unwrap();
        }
        let err = check_ip(&kv, "10.0.0.1", 10).unwrap_err();
        match err {
            GatewayError::RateLimited {
                scope,
                retry_after_secs,
                ..
            } => {
                assert_eq!(scope, RateScope::Ip);
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        // A different address is unaffected.
        check_ip(&kv, "10.0.0.2", 10).unwrap();
    }

    #[test]
    fn midnight_helpers_are_sane() {
        let secs = seconds_to_midnight();
        assert!(secs >= 1 && secs <= 86_400);
        let reset = next_midnight_rfc3339();
        assert!(reset.ends_with("T00:00:00Z"));
    }
}
