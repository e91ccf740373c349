use async_trait::async_trait;
use serde_json::Value;

use crate::models::{
    Achievement, Coordinates, CropData, DataPoint, DataType, FarmProfile, Feedback, Operation,
};

use super::ApiError;

/// Remote endpoints that accept queued mutations, one per operation kind.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    async fn sync_farm_profile(&self, profile: &FarmProfile) -> Result<(), ApiError>;

    async fn sync_crop_data(&self, crop: &CropData) -> Result<(), ApiError>;

    async fn sync_achievement(&self, achievement: &Achievement) -> Result<(), ApiError>;

    async fn sync_feedback(&self, feedback: &Feedback) -> Result<(), ApiError>;
}

/// Route an operation to its type-specific synchronizer.
pub async fn dispatch(sync: &dyn Synchronizer, operation: &Operation) -> Result<(), ApiError> {
    match operation {
        Operation::ProfileSave(profile) => sync.sync_farm_profile(profile).await,
        Operation::CropDataUpdate(crop) => sync.sync_crop_data(crop).await,
        Operation::AchievementUnlock(achievement) => sync.sync_achievement(achievement).await,
        Operation::FeedbackSubmit(feedback) => sync.sync_feedback(feedback).await,
    }
}

/// Live environmental data and static resources.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch a live observation. Successful results are tagged `measured`.
    async fn fetch_remote(
        &self,
        coordinates: Coordinates,
        data_type: &DataType,
    ) -> Result<DataPoint, ApiError>;

    async fn fetch_resource(&self, name: &str) -> Result<Value, ApiError>;
}

/// Lightweight liveness check.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> Result<(), ApiError>;
}
