use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use crate::error::Result;

/// One day of process-wide spend.
#[derive(Debug, Clone, Default)]
pub struct GlobalDay {
    pub total_cost_millicents: u64,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub unique_users: u64,
}

/// Store for the global-day and user-day buckets. Buckets are created
/// lazily on first contributing write and never deleted.
pub struct UsageStore {
    db: Arc<Mutex<Connection>>,
}

impl UsageStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Post-flight global accounting for one successful turn: one
    /// transaction upserting the global bucket and, when the turn belongs
    /// to a user with no prior successful turn today, bumping
    /// `unique_users`.
    ///
    /// Runs before the token-ledger `add` for the same turn — first-turn
    /// detection reads the user-day row, which `add` is about to create.
    #[instrument(skip(self))]
    pub fn record(
        &self,
        day: &str,
        cost_millicents: u64,
        tokens: u64,
        user_id: Option<&str>,
    ) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let first_today = match user_id {
            Some(uid) => tx
                .query_row(
                    "SELECT 1 FROM user_day_usage WHERE user_id = ?1 AND date = ?2",
                    params![uid, day],
                    |_| Ok(()),
                )
                .optional()?
                .is_none(),
            None => false,
        };

        tx.execute(
            "INSERT INTO global_day_cost
                (date, total_cost_millicents, total_requests, total_tokens, unique_users)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(date) DO UPDATE SET
                total_cost_millicents = total_cost_millicents + excluded.total_cost_millicents,
                total_requests        = total_requests + 1,
                total_tokens          = total_tokens + excluded.total_tokens,
                unique_users          = unique_users + excluded.unique_users",
            params![day, cost_millicents as i64, tokens as i64, first_today as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Token-ledger upsert: add `tokens` and one request to the user's day
    /// bucket. Called once per successful turn.
    pub fn add_user(&self, user_id: &str, day: &str, tokens: u64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO user_day_usage (user_id, date, total_tokens_used, request_count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(user_id, date) DO UPDATE SET
                total_tokens_used = total_tokens_used + excluded.total_tokens_used,
                request_count     = request_count + 1",
            params![user_id, day, tokens as i64],
        )?;
        Ok(())
    }

    /// The user's day bucket as (tokens_used, request_count); zeros when the
    /// bucket does not exist yet.
    pub fn user_day(&self, user_id: &str, day: &str) -> Result<(u64, u64)> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT total_tokens_used, request_count FROM user_day_usage
                 WHERE user_id = ?1 AND date = ?2",
                params![user_id, day],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
            )
            .optional()?;
        Ok(row.unwrap_or((0, 0)))
    }

    /// The global day bucket; all-zero when nothing has been spent yet.
    pub fn global_day(&self, day: &str) -> Result<GlobalDay> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT total_cost_millicents, total_requests, total_tokens, unique_users
                 FROM global_day_cost WHERE date = ?1",
                params![day],
                |row| {
                    Ok(GlobalDay {
                        total_cost_millicents: row.get::<_, i64>(0)? as u64,
                        total_requests: row.get::<_, i64>(1)? as u64,
                        total_tokens: row.get::<_, i64>(2)? as u64,
                        unique_users: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> UsageStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        UsageStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn global_bucket_accumulates() {
        let s = store();
        s.record("2026-08-01", 100, 500, None).unwrap();
        s.record("2026-08-01", 50, 200, None).unwrap();
        let g = s.global_day("2026-08-01").unwrap();
        assert_eq!(g.total_cost_millicents, 150);
        assert_eq!(g.total_requests, 2);
        assert_eq!(g.total_tokens, 700);
        assert_eq!(g.unique_users, 0);
        assert_eq!(s.global_day("2026-08-02").unwrap().total_requests, 0);
    }

    #[test]
    fn unique_users_counts_first_turn_only() {
        let s = store();
        // record-then-add ordering, as the orchestrator does it.
        s.record("2026-08-01", 10, 100, Some("u1")).unwrap();
        s.add_user("u1", "2026-08-01", 100).unwrap();
        s.record("2026-08-01", 10, 100, Some("u1")).unwrap();
        s.add_user("u1", "2026-08-01", 100).unwrap();
        s.record("2026-08-01", 10, 100, Some("u2")).unwrap();
        s.add_user("u2", "2026-08-01", 100).unwrap();
        assert_eq!(s.global_day("2026-08-01").unwrap().unique_users, 2);
    }

    #[test]
    fn user_ledger_upserts() {
        let s = store();
        assert_eq!(s.user_day("u1", "2026-08-01").unwrap(), (0, 0));
        s.add_user("u1", "2026-08-01", 120).unwrap();
        s.add_user("u1", "2026-08-01", 30).unwrap();
        assert_eq!(s.user_day("u1", "2026-08-01").unwrap(), (150, 2));
        // Day isolation.
        assert_eq!(s.user_day("u1", "2026-08-02").unwrap(), (0, 0));
    }
}
