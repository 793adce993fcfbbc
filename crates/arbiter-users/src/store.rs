use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection};
use tracing::{info, instrument};
use uuid::Uuid;

use arbiter_core::types::Tier;

use crate::db::{row_to_user, USER_COLUMNS};
use crate::error::{Result, UserError};
use crate::types::User;

/// Thread-safe store for the `users` table.
///
/// Wraps the shared SQLite connection in a `Mutex`, same as the other row
/// stores. Single-node deployment target; a pool can replace this behind
/// the same surface.
pub struct UserStore {
    db: Arc<Mutex<Connection>>,
}

impl UserStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Insert a brand-new user row with `tier=free`. The id is generated
    /// here so the caller immediately has the canonical id.
    ///
    /// Fails with `EmailTaken` when the email is already registered.
    #[instrument(skip(self, password_hash))]
    pub fn create(&self, email: &str, password_hash: &str) -> Result<User> {
        let now = now_micros();
        let user = User {
            id: Uuid::now_v7().to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            tier: Tier::Free,
            email_verified: false,
            created_at: now.clone(),
            updated_at: now,
            deleted_at: None,
        };

        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT INTO users
                (id, email, password_hash, tier, email_verified, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                user.id,
                user.email,
                user.password_hash,
                user.tier.as_str(),
                user.email_verified as i32,
                user.created_at,
            ],
        );
        match inserted {
            Ok(_) => {
                info!(user_id = %user.id, "user created");
                Ok(user)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(UserError::EmailTaken)
            }
            Err(e) => Err(UserError::Database(e)),
        }
    }

    /// Live-user lookup by email. Soft-deleted rows are invisible here.
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?1 AND deleted_at IS NULL"
        ))?;
        match stmt.query_row(params![email], row_to_user) {
            Ok(u) => Ok(Some(u)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(UserError::Database(e)),
        }
    }

    /// Live-user lookup by primary key. Returns None for soft-deleted rows —
    /// session resolve uses that to detect a gone user.
    pub fn get(&self, user_id: &str) -> Result<Option<User>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?1 AND deleted_at IS NULL"
        ))?;
        match stmt.query_row(params![user_id], row_to_user) {
            Ok(u) => Ok(Some(u)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(UserError::Database(e)),
        }
    }

    /// Administrative soft delete. The row stays (turns may reference it);
    /// every live-user query stops seeing it, and any surviving session is
    /// destroyed on next resolve.
    #[instrument(skip(self))]
    pub fn soft_delete(&self, user_id: &str) -> Result<()> {
        let now = now_micros();
        let db = self.db.lock().unwrap();
        let rows = db.execute(
            "UPDATE users SET deleted_at = ?2, updated_at = ?2
             WHERE id = ?1 AND deleted_at IS NULL",
            params![user_id, now],
        )?;
        if rows == 0 {
            return Err(UserError::NotFound(user_id.to_string()));
        }
        info!(user_id, "user soft-deleted");
        Ok(())
    }
}

/// RFC3339 with microsecond precision — the row-store timestamp format.
pub(crate) fn now_micros() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> UserStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        UserStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn create_and_lookup() {
        let s = store();
        let u = s.create("a@b.co", "digest").unwrap();
        assert_eq!(u.tier, Tier::Free);
        let found = s.find_by_email("a@b.co").unwrap().unwrap();
        assert_eq!(found.id, u.id);
        assert!(s.get(&u.id).unwrap().is_some());
    }

    #[test]
    fn duplicate_email_is_taken() {
        let s = store();
        s.create("a@b.co", "digest").unwrap();
        assert!(matches!(
            s.create("a@b.co", "other"),
            Err(UserError::EmailTaken)
        ));
    }

    #[test]
    fn soft_delete_hides_user() {
        let s = store();
        let u = s.create("a@b.co", "digest").unwrap();
        s.soft_delete(&u.id).unwrap();
        assert!(s.get(&u.id).unwrap().is_none());
        assert!(s.find_by_email("a@b.co").unwrap().is_none());
        // Double delete is NotFound, not a silent success.
        assert!(matches!(
            s.soft_delete(&u.id),
            Err(UserError::NotFound(_))
        ));
    }
}
