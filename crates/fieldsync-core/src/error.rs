//! Error taxonomy of the offline data manager.
//!
//! None of these escape the public `OfflineManager` contract as failures;
//! they are logged, reported in summaries, and mapped to degraded results.

use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Partial sync failure: {failed} of {attempted} operations failed and remain queued")]
    PartialSyncFailure { attempted: usize, failed: usize },
}

impl From<StoreError> for OfflineError {
    fn from(e: StoreError) -> Self {
        OfflineError::StorageUnavailable(e.to_string())
    }
}

impl From<ApiError> for OfflineError {
    fn from(e: ApiError) -> Self {
        OfflineError::NetworkUnavailable(e.to_string())
    }
}
