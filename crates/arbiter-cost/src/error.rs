use thiserror::Error;

#[derive(Debug, Error)]
pub enum CostError {
    /// No price row for the model — billing fails closed, the call is never
    /// made.
    #[error("no pricing for model '{0}'")]
    UnknownModel(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, CostError>;
