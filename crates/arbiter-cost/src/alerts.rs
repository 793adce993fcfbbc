use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use arbiter_kv::KvStore;

/// Out-of-band notification hook for budget threshold crossings. The
/// default sink only logs; deployments plug in pager/webhook sinks here.
pub trait AlertSink: Send + Sync {
    fn notify(&self, day: &str, threshold_pct: u8, spent_millicents: u64, budget_millicents: u64);
}

pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, day: &str, threshold_pct: u8, spent_millicents: u64, budget_millicents: u64) {
        warn!(
            day,
            threshold_pct,
            spent_millicents,
            budget_millicents,
            "daily budget threshold crossed"
        );
    }
}

const FLAG_TTL: Duration = Duration::from_secs(24 * 3600);

/// Multi-threshold budget alerting with at-most-once-per-day firing,
/// enforced by a set-if-absent KV flag per (day, threshold).
pub struct BudgetAlerts {
    kv: Arc<KvStore>,
    thresholds: Vec<u8>,
    sink: Box<dyn AlertSink>,
}

impl BudgetAlerts {
    pub fn new(kv: Arc<KvStore>, thresholds: Vec<u8>, sink: Box<dyn AlertSink>) -> Self {
        Self {
            kv,
            thresholds,
            sink,
        }
    }

    /// Called after every `record`. Fires each configured threshold whose
    /// percentage is now reached and whose daily flag is still unset.
    pub fn check(&self, day: &str, spent_millicents: u64, budget_millicents: u64) {
        if budget_millicents == 0 {
            return;
        }
        for &pct in &self.thresholds {
            // Integer compare: spent/budget >= pct/100.
            if spent_millicents * 100 >= budget_millicents * u64::from(pct) {
                let flag = format!("budget_alert_{pct}:{day}");
                if self.kv.set_nx_ex(&flag, "1", FLAG_TTL) {
                    self.sink.notify(day, pct, spent_millicents, budget_millicents);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CountingSink(Mutex<Vec<u8>>);

    impl AlertSink for &'static CountingSink {
        fn notify(&self, _day: &str, pct: u8, _spent: u64, _budget: u64) {
            self.0.lock().unwrap().push(pct);
        }
    }

    fn fired(sink: &CountingSink) -> Vec<u8> {
        sink.0.lock().unwrap().clone()
    }

    #[test]
    fn each_threshold_fires_at_most_once() {
        static SINK: CountingSink = CountingSink(Mutex::new(Vec::new()));
        let kv = Arc::new(KvStore::new());
        let alerts = BudgetAlerts::new(kv, vec![50, 75, 90], Box::new(&SINK));

        // 60% -> 50 fires once.
        alerts.check("2026-08-01", 60, 100);
        alerts.check("2026-08-01", 65, 100);
        assert_eq!(fired(&SINK), vec![50]);

        // 95% -> 75 and 90 fire, 50 stays silent.
        alerts.check("2026-08-01", 95, 100);
        alerts.check("2026-08-01", 99, 100);
        assert_eq!(fired(&SINK), vec![50, 75, 90]);
    }

    #[test]
    fn thresholds_are_per_day() {
        static SINK: CountingSink = CountingSink(Mutex::new(Vec::new()));
        let kv = Arc::new(KvStore::new());
        let alerts = BudgetAlerts::new(kv, vec![50], Box::new(&SINK));
        alerts.check("2026-08-01", 60, 100);
        alerts.check("2026-08-02", 60, 100);
        assert_eq!(fired(&SINK), vec![50, 50]);
    }
}
