use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Serialization/deserialization error: {0}")]
    Serialization(String),

    #[error("Key-value backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("Transaction aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
