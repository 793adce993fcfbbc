use rusqlite::Connection;

use crate::error::Result;

/// Initialise the day-bucket tables.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_day_usage (
            user_id           TEXT NOT NULL,
            date              TEXT NOT NULL,
            total_tokens_used INTEGER NOT NULL DEFAULT 0,
            request_count     INTEGER NOT NULL DEFAULT 0,
            UNIQUE(user_id, date)
        );

        CREATE TABLE IF NOT EXISTS global_day_cost (
            date                 TEXT PRIMARY KEY,
            total_cost_millicents INTEGER NOT NULL DEFAULT 0,
            total_requests       INTEGER NOT NULL DEFAULT 0,
            total_tokens         INTEGER NOT NULL DEFAULT 0,
            unique_users         INTEGER NOT NULL DEFAULT 0
        );",
    )?;
    Ok(())
}
