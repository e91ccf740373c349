use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        StoreError::StorageUnavailable(format!("{}: {}", context, err))
    }
}
