use serde::{Deserialize, Serialize};

use arbiter_core::types::Tier;

/// A registered account row. Soft-deleted users keep their row (turns may
/// still reference them) but are invisible to every non-admin query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// UUIDv7 primary key — time-sortable.
    pub id: String,
    /// Stored lowercase; unique across the table.
    pub email: String,
    /// Argon2id PHC string. Never serialized to clients.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub tier: Tier,
    pub email_verified: bool,
    /// RFC3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl User {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}
