use rusqlite::Connection;

use arbiter_core::types::Tier;

use crate::error::Result;
use crate::types::User;

/// Initialise the users table and its email index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id             TEXT PRIMARY KEY,
            email          TEXT NOT NULL UNIQUE,
            password_hash  TEXT NOT NULL,
            tier           TEXT NOT NULL DEFAULT 'free',
            email_verified INTEGER NOT NULL DEFAULT 0,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            deleted_at     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_users_email
            ON users(email) WHERE deleted_at IS NULL;",
    )?;
    Ok(())
}

pub(crate) const USER_COLUMNS: &str =
    "id, email, password_hash, tier, email_verified, created_at, updated_at, deleted_at";

/// Map a SQLite row (selected with `USER_COLUMNS`) to a `User`.
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let tier_str: String = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        // Unknown tier tags in storage degrade to the lowest paid-nothing
        // tier instead of failing the whole query.
        tier: Tier::parse(&tier_str).unwrap_or(Tier::Free),
        email_verified: row.get::<_, i32>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}
