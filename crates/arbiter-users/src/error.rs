use thiserror::Error;

/// User-layer errors. Kept separate from the gateway taxonomy so the HTTP
/// layer can map them without coupling the storage layer to status codes.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found: {0}")]
    NotFound(String),

    #[error("email already registered")]
    EmailTaken,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("credential hashing failed: {0}")]
    Hash(String),
}

pub type Result<T> = std::result::Result<T, UserError>;
