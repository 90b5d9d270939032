use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store is unreachable; callers degrade to in-memory-only.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key too large: {0} bytes")]
    KeyTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, StoreError>;
