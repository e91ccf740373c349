//! Shared fixtures for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::api::{ApiError, DataSource, Probe, Synchronizer};
use crate::models::{
    Achievement, Coordinates, CropData, DataPoint, DataType, FarmProfile, Feedback, Operation,
    OperationKind, Readings,
};

pub fn profile(name: &str) -> Operation {
    Operation::ProfileSave(FarmProfile {
        farm_id: "farm-1".to_string(),
        name: name.to_string(),
        location: None,
        extra: Map::new(),
    })
}

pub fn crop(zone: &str) -> Operation {
    Operation::CropDataUpdate(CropData {
        farm_id: "farm-1".to_string(),
        zone_id: zone.to_string(),
        crop: "wheat".to_string(),
        extra: Map::new(),
    })
}

pub fn feedback(message: &str) -> Operation {
    Operation::FeedbackSubmit(Feedback {
        message: message.to_string(),
        rating: None,
        extra: Map::new(),
    })
}

/// Poll `condition` until it holds, panicking after a few seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// In-memory stand-in for the remote backend.
///
/// Records every sync call as `(kind, label)` where the label is the profile
/// name, zone id, achievement id or feedback message.
#[derive(Default)]
pub struct MockRemote {
    calls: Mutex<Vec<(OperationKind, String)>>,
    fail_labels: Mutex<HashSet<String>>,
    unreachable: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
    waiting: AtomicUsize,
    live: Mutex<HashMap<String, Readings>>,
    fetches: AtomicUsize,
    resources: Mutex<HashMap<String, Value>>,
}

impl MockRemote {
    pub fn calls(&self) -> Vec<(OperationKind, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_label(&self, label: &str) {
        self.fail_labels.lock().unwrap().insert(label.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_labels.lock().unwrap().clear();
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Block every sync call until permits are added to the returned gate.
    pub fn install_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Sync calls currently parked on the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn set_live(&self, data_type: &DataType, readings: Readings) {
        self.live
            .lock()
            .unwrap()
            .insert(data_type.as_str().to_string(), readings);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_resource(&self, name: &str, body: Value) {
        self.resources.lock().unwrap().insert(name.to_string(), body);
    }

    async fn record(&self, kind: OperationKind, label: &str) -> Result<(), ApiError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let permit = gate.acquire().await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        }

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ApiError::Timeout);
        }
        if self.fail_labels.lock().unwrap().contains(label) {
            return Err(ApiError::ServerError(format!("{} failed", label)));
        }

        self.calls.lock().unwrap().push((kind, label.to_string()));
        Ok(())
    }
}

#[async_trait]
impl Synchronizer for MockRemote {
    async fn sync_farm_profile(&self, profile: &FarmProfile) -> Result<(), ApiError> {
        self.record(OperationKind::ProfileSave, &profile.name).await
    }

    async fn sync_crop_data(&self, crop: &CropData) -> Result<(), ApiError> {
        self.record(OperationKind::CropDataUpdate, &crop.zone_id).await
    }

    async fn sync_achievement(&self, achievement: &Achievement) -> Result<(), ApiError> {
        self.record(OperationKind::AchievementUnlock, &achievement.achievement_id)
            .await
    }

    async fn sync_feedback(&self, feedback: &Feedback) -> Result<(), ApiError> {
        self.record(OperationKind::FeedbackSubmit, &feedback.message).await
    }
}

#[async_trait]
impl DataSource for MockRemote {
    async fn fetch_remote(
        &self,
        coordinates: Coordinates,
        data_type: &DataType,
    ) -> Result<DataPoint, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ApiError::Timeout);
        }
        let readings = self.live.lock().unwrap().get(data_type.as_str()).cloned();
        match readings {
            Some(readings) => Ok(DataPoint::measured(
                coordinates,
                data_type.clone(),
                readings,
                format!("remote:{}", data_type),
            )),
            None => Err(ApiError::NotFound(data_type.to_string())),
        }
    }

    async fn fetch_resource(&self, name: &str) -> Result<Value, ApiError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ApiError::Timeout);
        }
        self.resources
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl Probe for MockRemote {
    async fn probe(&self) -> Result<(), ApiError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(ApiError::Timeout)
        } else {
            Ok(())
        }
    }
}
