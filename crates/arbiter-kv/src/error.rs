use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    /// A counter op hit a blob key or vice versa. Namespaces keep the two
    /// apart; hitting this means a key-construction bug.
    #[error("wrong value type at key '{key}'")]
    WrongType { key: String },
}

pub type Result<T> = std::result::Result<T, KvError>;
