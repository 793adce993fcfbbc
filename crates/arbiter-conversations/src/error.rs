use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversationError {
    /// Unknown id, not owned by the caller, or soft-deleted — callers must
    /// not be able to tell these apart.
    #[error("conversation not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ConversationError>;
