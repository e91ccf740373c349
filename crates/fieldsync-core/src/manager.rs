//! The offline data manager.
//!
//! `OfflineManager` is the one object callers talk to. It wires the durable
//! store, resource cache, connectivity monitor, operation queue, sync engine
//! and fallback estimator together, and owns the two background tasks
//! (connectivity monitoring and the drain trigger) until `shutdown`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(feature = "ts")]
use ts_rs::TS;

use crate::api::{dispatch, DataSource, Probe, Synchronizer};
use crate::cache::ResourceCache;
use crate::config::{Config, MaxAgePolicy};
use crate::connectivity::{ConnectivityMonitor, ConnectivityState, ProbeSettings, Transition};
use crate::error::OfflineError;
use crate::fallback::FallbackEstimator;
use crate::models::{CacheEntry, Coordinates, DataPoint, DataType, Operation, Quality};
use crate::store::{Collection, DurableStore, IndexQuery, NewRecord};
use crate::sync::{OperationQueue, SyncEngine, SyncSummary};

/// Settings key for the user's offline override.
const MANUAL_OFFLINE_KEY: &str = "manual_offline";

/// Platform signals buffered before senders wait.
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// The remote backend as seen by the manager.
#[derive(Clone)]
pub struct Collaborators {
    pub synchronizer: Arc<dyn Synchronizer>,
    pub data_source: Arc<dyn DataSource>,
    pub probe: Arc<dyn Probe>,
}

impl Collaborators {
    /// One value implementing all three seams, e.g. `ApiClient`.
    pub fn shared<R>(remote: Arc<R>) -> Self
    where
        R: Synchronizer + DataSource + Probe + 'static,
    {
        Self {
            synchronizer: remote.clone(),
            data_source: remote.clone(),
            probe: remote,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// `None` keeps everything in memory.
    pub store_dir: Option<PathBuf>,
    /// `None` disables the resource cache.
    pub resource_dir: Option<PathBuf>,
    pub cache_version: String,
    pub probe: ProbeSettings,
    pub max_age: MaxAgePolicy,
    /// Connectivity reported by the platform at startup.
    pub platform_online: bool,
    pub estimator_seed: Option<u64>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            store_dir: None,
            resource_dir: None,
            cache_version: "v1".to_string(),
            probe: ProbeSettings::default(),
            max_age: MaxAgePolicy::default(),
            platform_online: true,
            estimator_seed: None,
        }
    }
}

impl ManagerOptions {
    pub fn from_config(config: &Config, platform_online: bool) -> Result<Self> {
        Ok(Self {
            store_dir: Some(config.store_dir()?),
            resource_dir: Some(config.resource_dir()?),
            cache_version: config.cache_version.clone(),
            probe: config.probe_settings(),
            max_age: config.max_age,
            platform_online,
            estimator_seed: None,
        })
    }
}

/// How a mutation reached (or will reach) the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    Synced,
    Queued { operation_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct MutationOutcome {
    /// Written to the local collection for its kind.
    pub persisted: bool,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct ManagerStatus {
    pub connectivity_state: ConnectivityState,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_operation_count: usize,
}

pub struct OfflineManager {
    store: Arc<DurableStore>,
    resources: Option<ResourceCache>,
    monitor: Arc<ConnectivityMonitor>,
    queue: Arc<OperationQueue>,
    engine: Arc<SyncEngine>,
    estimator: FallbackEstimator,
    synchronizer: Arc<dyn Synchronizer>,
    data_source: Arc<dyn DataSource>,
    max_age: MaxAgePolicy,
    signals: mpsc::Sender<bool>,
    drain_requests: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl OfflineManager {
    /// Open storage, restore persisted state and start the background tasks.
    ///
    /// Never fails: an unusable store directory degrades to an in-memory
    /// store and an unusable resource directory disables the resource cache.
    pub async fn init(options: ManagerOptions, remote: Collaborators) -> Self {
        let store = match options.store_dir {
            Some(ref dir) => match DurableStore::open(dir).await {
                Ok(store) => store,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %OfflineError::from(e), "Continuing without persistence");
                    DurableStore::in_memory()
                }
            },
            None => DurableStore::in_memory(),
        };
        let store = Arc::new(store);

        let resources = options.resource_dir.as_ref().and_then(|dir| {
            ResourceCache::new(dir.clone(), &options.cache_version)
                .map_err(|e| warn!(error = %e, "Resource cache disabled"))
                .ok()
        });

        let manual = match store.get_setting::<bool>(MANUAL_OFFLINE_KEY).await {
            Ok(value) => value.unwrap_or(false),
            Err(e) => {
                debug!(error = %e, "Manual offline setting unreadable");
                false
            }
        };
        let initial = if manual {
            ConnectivityState::OfflineManual
        } else {
            ConnectivityState::from_platform(options.platform_online)
        };

        let monitor = Arc::new(ConnectivityMonitor::new(initial));
        let queue = Arc::new(OperationQueue::open(Arc::clone(&store)).await);
        let engine = Arc::new(
            SyncEngine::new(
                Arc::clone(&queue),
                Arc::clone(&store),
                Arc::clone(&remote.synchronizer),
            )
            .await,
        );

        let estimator = match options.estimator_seed {
            Some(seed) => FallbackEstimator::with_seed(seed),
            None => FallbackEstimator::new(),
        };

        // Leftovers from a previous session go out as soon as we start online
        let drain_at_start = monitor.is_online() && !queue.is_empty().await;

        let (signals, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let transitions = monitor.subscribe();
        let drain_requests = Arc::new(Notify::new());

        let tasks = vec![
            monitor.spawn(
                Arc::clone(&remote.probe),
                options.probe,
                signal_rx,
                shutdown_rx.clone(),
            ),
            spawn_drain_trigger(
                Arc::clone(&engine),
                Arc::clone(&monitor),
                transitions,
                Arc::clone(&drain_requests),
                shutdown_rx,
                drain_at_start,
            ),
        ];

        info!(
            state = %initial,
            persistent = store.is_persistent(),
            pending = queue.len().await,
            "Offline manager ready"
        );

        Self {
            store,
            resources,
            monitor,
            queue,
            engine,
            estimator,
            synchronizer: remote.synchronizer,
            data_source: remote.data_source,
            max_age: options.max_age,
            signals,
            drain_requests,
            shutdown,
            tasks,
        }
    }

    /// Stop the background tasks and wait for them. A drain in progress runs
    /// to completion first.
    pub async fn shutdown(self) {
        // Receivers gone means the tasks already stopped
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        debug!("Offline manager shut down");
    }

    // ===== Environmental data =====

    /// Best available value for a location.
    ///
    /// Fresh cache, then live fetch (cached on success), then the fallback
    /// estimator (also cached). Never fails; unknown data types yield an
    /// `unavailable` payload.
    pub async fn get_data(&self, coordinates: Coordinates, data_type: &DataType) -> DataPoint {
        let (Some(collection), Some(max_age)) = (
            Collection::for_data_type(data_type),
            self.max_age.for_type(data_type),
        ) else {
            debug!(error = %OfflineError::UnsupportedDataType(data_type.to_string()), "No data for request");
            return self.estimator.estimate(coordinates, data_type);
        };

        let now = Utc::now();
        let fresh = self
            .latest_entry(collection, coordinates, data_type)
            .await
            .filter(|entry| entry.is_fresh(max_age, now));

        let stored_estimate = match fresh {
            Some(entry) if entry.quality != Quality::Estimated => {
                debug!(key = %entry.key, "Serving fresh cache entry");
                return entry.payload.served_from_cache();
            }
            other => other,
        };

        if self.monitor.is_online() {
            match self.data_source.fetch_remote(coordinates, data_type).await {
                Ok(point) => {
                    self.cache_point(collection, &point).await;
                    return point;
                }
                Err(e) => {
                    debug!(%coordinates, data_type = %data_type, error = %OfflineError::from(e), "Live fetch failed");
                }
            }
        }

        if let Some(entry) = stored_estimate {
            return entry.payload;
        }

        let estimate = self.estimator.estimate(coordinates, data_type);
        self.cache_point(collection, &estimate).await;
        estimate
    }

    async fn latest_entry(
        &self,
        collection: Collection,
        coordinates: Coordinates,
        data_type: &DataType,
    ) -> Option<CacheEntry> {
        let key = CacheEntry::slot_key(&coordinates, data_type);
        let records = match self
            .store
            .get_all(collection, Some(IndexQuery::Coordinates(coordinates)))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                debug!(collection = %collection, error = %e, "Cache lookup skipped");
                return None;
            }
        };

        // Ordered by timestamp, so the last match is the newest
        records
            .iter()
            .filter_map(|r| r.decode::<CacheEntry>().ok())
            .filter(|entry| entry.key == key)
            .last()
    }

    async fn cache_point(&self, collection: Collection, point: &DataPoint) {
        let entry = CacheEntry::from_point(point.clone());
        let result = match NewRecord::from_serialize(&entry) {
            Ok(record) => {
                let record = record
                    .at(Some(entry.coordinates))
                    .with_timestamp(entry.timestamp);
                self.store.put(collection, record).await.map(|_| ())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(key = %entry.key, error = %OfflineError::from(e), "Value not cached");
        }
    }

    // ===== Mutations =====

    /// Persist a user mutation locally and deliver it, now or later.
    pub async fn record_mutation(&self, operation: Operation) -> MutationOutcome {
        let kind = operation.kind();
        let collection = Collection::for_operation(kind);

        let persisted = match NewRecord::from_serialize(&operation) {
            Ok(record) => self
                .store
                .put(collection, record.at(operation.coordinates()))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        let persisted = match persisted {
            Ok(()) => true,
            Err(e) => {
                warn!(kind = %kind, error = %OfflineError::from(e), "Mutation not persisted locally");
                false
            }
        };

        let online = self.monitor.is_online();
        // Same-kind operations already queued must reach the remote first
        let deferred =
            online && (self.engine.is_draining() || self.queue.has_pending(kind).await);

        if online && !deferred {
            match dispatch(self.synchronizer.as_ref(), &operation).await {
                Ok(()) => {
                    debug!(kind = %kind, "Mutation synced directly");
                    return MutationOutcome {
                        persisted,
                        delivery: Delivery::Synced,
                    };
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Direct sync failed, queueing");
                }
            }
        }

        let queued = self.queue.enqueue(operation).await;
        if deferred {
            debug!(kind = %kind, id = queued.id, "Queued behind pending operations");
            self.drain_requests.notify_one();
        }
        MutationOutcome {
            persisted,
            delivery: Delivery::Queued {
                operation_id: queued.id,
            },
        }
    }

    // ===== Status & control =====

    pub async fn get_status(&self) -> ManagerStatus {
        ManagerStatus {
            connectivity_state: self.monitor.state(),
            last_sync_time: self.engine.last_sync_time(),
            pending_operation_count: self.queue.len().await,
        }
    }

    /// Turn the user's offline override on or off. Leaving it goes straight
    /// to Online, which starts a drain.
    pub async fn set_manual_offline_mode(&self, enabled: bool) -> ConnectivityState {
        self.monitor.set_manual_offline(enabled);
        if let Err(e) = self.store.put_setting(MANUAL_OFFLINE_KEY, &enabled).await {
            warn!(error = %e, "Manual offline mode not persisted");
        }
        self.monitor.state()
    }

    /// Drain the queue now. `None` if a drain is already running.
    pub async fn drain(&self) -> Option<SyncSummary> {
        self.engine.drain().await
    }

    /// Drain the queue now, waiting for a drain already running to finish
    /// first. The last summary is the one covering everything queued at
    /// the time of the call.
    pub async fn sync_now(&self) -> Vec<SyncSummary> {
        self.engine.drain_when_idle().await
    }

    /// A named resource, network-first with the cached body as fallback.
    pub async fn get_resource(&self, name: &str) -> Option<Value> {
        if self.monitor.is_online() {
            match self.data_source.fetch_resource(name).await {
                Ok(body) => {
                    if let Some(ref cache) = self.resources {
                        if let Err(e) = cache.cache_response(name, &body) {
                            warn!(name, error = %e, "Resource not cached");
                        }
                    }
                    return Some(body);
                }
                Err(e) => debug!(name, error = %e, "Resource fetch failed, trying cache"),
            }
        }

        self.resources.as_ref()?.fetch_cached(name)
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.monitor.subscribe()
    }

    pub fn subscribe_sync_summaries(&self) -> broadcast::Receiver<SyncSummary> {
        self.engine.subscribe()
    }

    /// Handle for reporting platform connectivity (`true` = online).
    pub fn signal_sender(&self) -> mpsc::Sender<bool> {
        self.signals.clone()
    }
}

/// Drain whenever connectivity comes back or a mutation was queued behind
/// pending ones.
fn spawn_drain_trigger(
    engine: Arc<SyncEngine>,
    monitor: Arc<ConnectivityMonitor>,
    mut transitions: broadcast::Receiver<Transition>,
    drain_requests: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    drain_at_start: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if drain_at_start {
            engine.drain().await;
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = drain_requests.notified() => {
                    engine.drain_when_idle().await;
                }
                received = transitions.recv() => match received {
                    Ok(transition) if transition.restores_connectivity() => {
                        engine.drain().await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed connectivity transitions");
                        if monitor.is_online() {
                            engine.drain().await;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Drain trigger stopped");
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationKind, Readings};
    use crate::test_helpers::{crop, feedback, profile, wait_until, MockRemote};
    use std::time::Duration;
    use tempfile::TempDir;

    fn options(platform_online: bool) -> ManagerOptions {
        ManagerOptions {
            platform_online,
            estimator_seed: Some(7),
            ..Default::default()
        }
    }

    async fn manager(options: ManagerOptions) -> (OfflineManager, Arc<MockRemote>) {
        let remote = Arc::new(MockRemote::default());
        let manager = OfflineManager::init(options, Collaborators::shared(Arc::clone(&remote))).await;
        (manager, remote)
    }

    fn soil(point: &DataPoint) -> f64 {
        match point.readings {
            Readings::SoilMoisture { soil_moisture } => soil_moisture,
            ref other => panic!("unexpected readings: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fresh_cache_entry_is_served_without_refetch() {
        let (manager, remote) = manager(options(true)).await;
        remote.set_live(&DataType::SoilMoisture, Readings::SoilMoisture { soil_moisture: 0.27 });
        let here = Coordinates::new(-33.9, 151.2);

        let live = manager.get_data(here, &DataType::SoilMoisture).await;
        assert_eq!(live.quality, Quality::Measured);

        let cached = manager.get_data(here, &DataType::SoilMoisture).await;
        assert_eq!(cached.quality, Quality::Cached);
        assert!((soil(&cached) - 0.27).abs() < 1e-9);
        assert_eq!(remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_without_cache_estimates() {
        let (manager, remote) = manager(options(false)).await;

        let point = manager
            .get_data(Coordinates::new(5.0, 10.0), &DataType::parse("smap"))
            .await;
        assert_eq!(point.quality, Quality::Estimated);
        assert!((soil(&point) - 0.4).abs() < 1e-9);
        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_stored_estimate_is_stable() {
        let (manager, _) = manager(options(false)).await;
        let here = Coordinates::new(40.0, 1.5);

        let first = manager.get_data(here, &DataType::Weather).await;
        let second = manager.get_data(here, &DataType::Weather).await;
        assert_eq!(first.quality, Quality::Estimated);
        assert_eq!(second.quality, Quality::Estimated);
        // Same stored entry, not a second draw of jitter
        assert_eq!(first.captured_at, second.captured_at);
    }

    #[tokio::test]
    async fn test_stale_entry_falls_back_to_estimate() {
        let mut opts = options(true);
        opts.max_age.soil_moisture_secs = 0;
        let (manager, remote) = manager(opts).await;
        remote.set_live(&DataType::SoilMoisture, Readings::SoilMoisture { soil_moisture: 0.11 });
        let here = Coordinates::new(60.0, 10.0);

        assert_eq!(manager.get_data(here, &DataType::SoilMoisture).await.quality, Quality::Measured);

        remote.set_reachable(false);
        let point = manager.get_data(here, &DataType::SoilMoisture).await;
        assert_eq!(point.quality, Quality::Estimated);
        assert!((soil(&point) - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unsupported_type_is_unavailable() {
        let (manager, remote) = manager(options(true)).await;
        let point = manager
            .get_data(Coordinates::new(5.0, 10.0), &DataType::parse("lidar"))
            .await;
        assert_eq!(point.quality, Quality::Unavailable);
        assert!(matches!(point.readings, Readings::Unavailable { .. }));
        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_mutation_online_syncs_directly() {
        let (manager, remote) = manager(options(true)).await;
        let outcome = manager.record_mutation(crop("z7")).await;

        assert!(outcome.persisted);
        assert_eq!(outcome.delivery, Delivery::Synced);
        assert_eq!(remote.calls(), vec![(OperationKind::CropDataUpdate, "z7".to_string())]);
        assert_eq!(manager.get_status().await.pending_operation_count, 0);
    }

    #[tokio::test]
    async fn test_mutation_online_failure_is_queued() {
        let (manager, remote) = manager(options(true)).await;
        remote.fail_label("Hilltop");

        let outcome = manager.record_mutation(profile("Hilltop")).await;
        assert!(matches!(outcome.delivery, Delivery::Queued { .. }));
        assert_eq!(manager.get_status().await.pending_operation_count, 1);
    }

    #[tokio::test]
    async fn test_mutation_offline_is_queued_and_persisted() {
        let (manager, remote) = manager(options(false)).await;
        let outcome = manager.record_mutation(profile("A")).await;

        assert!(outcome.persisted);
        assert_eq!(outcome.delivery, Delivery::Queued { operation_id: 0 });
        assert!(remote.calls().is_empty());

        let status = manager.get_status().await;
        assert_eq!(status.connectivity_state, ConnectivityState::Offline);
        assert_eq!(status.pending_operation_count, 1);
        assert_eq!(status.last_sync_time, None);
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue_in_order() {
        let (manager, remote) = manager(options(false)).await;
        manager.record_mutation(profile("A")).await;
        manager.record_mutation(profile("B")).await;

        let mut summaries = manager.subscribe_sync_summaries();
        manager.signal_sender().send(true).await.unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(5), summaries.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(
            remote.calls(),
            vec![
                (OperationKind::ProfileSave, "A".to_string()),
                (OperationKind::ProfileSave, "B".to_string()),
            ]
        );

        let status = manager.get_status().await;
        assert_eq!(status.connectivity_state, ConnectivityState::Online);
        assert_eq!(status.pending_operation_count, 0);
        assert_eq!(status.last_sync_time, Some(summary.started_at));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_leaving_manual_mode_drains() {
        let (manager, remote) = manager(options(true)).await;
        assert_eq!(manager.set_manual_offline_mode(true).await, ConnectivityState::OfflineManual);

        let outcome = manager.record_mutation(crop("z1")).await;
        assert!(matches!(outcome.delivery, Delivery::Queued { .. }));

        let mut summaries = manager.subscribe_sync_summaries();
        assert_eq!(manager.set_manual_offline_mode(false).await, ConnectivityState::Online);

        let summary = tokio::time::timeout(Duration::from_secs(5), summaries.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_mode_survives_restart() {
        let dir = TempDir::new().unwrap();
        let opts = ManagerOptions {
            store_dir: Some(dir.path().join("store")),
            ..options(true)
        };

        let (first, _) = manager(opts.clone()).await;
        first.set_manual_offline_mode(true).await;
        first.record_mutation(profile("A")).await;
        first.shutdown().await;

        let (second, remote) = manager(opts).await;
        let status = second.get_status().await;
        assert_eq!(status.connectivity_state, ConnectivityState::OfflineManual);
        assert_eq!(status.pending_operation_count, 1);
        assert!(remote.calls().is_empty());
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_resource_served_from_cache_when_unreachable() {
        let dir = TempDir::new().unwrap();
        let opts = ManagerOptions {
            resource_dir: Some(dir.path().to_path_buf()),
            ..options(true)
        };
        let (manager, remote) = manager(opts).await;
        let body = serde_json::json!({ "crops": ["wheat", "maize"] });
        remote.set_resource("crop-catalog", body.clone());

        assert_eq!(manager.get_resource("crop-catalog").await, Some(body.clone()));

        remote.set_reachable(false);
        assert_eq!(manager.get_resource("crop-catalog").await, Some(body));
        assert_eq!(manager.get_resource("unknown").await, None);
    }

    #[tokio::test]
    async fn test_unusable_store_dir_degrades_to_memory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();

        let (manager, _) = manager(ManagerOptions {
            store_dir: Some(file),
            ..options(false)
        })
        .await;
        let outcome = manager.record_mutation(profile("A")).await;
        assert!(outcome.persisted);
        assert_eq!(manager.get_status().await.pending_operation_count, 1);
    }

    #[tokio::test]
    async fn test_online_mutation_waits_behind_queued_same_kind() {
        let (manager, remote) = manager(options(true)).await;
        remote.fail_label("A");
        let first = manager.record_mutation(profile("A")).await;
        let Delivery::Queued { operation_id: first_id } = first.delivery else {
            panic!("expected A to be queued, got {:?}", first.delivery);
        };

        remote.clear_failures();
        let mut summaries = manager.subscribe_sync_summaries();
        let second = manager.record_mutation(profile("B")).await;
        let Delivery::Queued { operation_id: second_id } = second.delivery else {
            panic!("expected B to be queued, got {:?}", second.delivery);
        };
        assert!(second_id > first_id);

        loop {
            let summary = tokio::time::timeout(Duration::from_secs(5), summaries.recv())
                .await
                .unwrap()
                .unwrap();
            if summary.outcomes.iter().any(|o| o.operation_id == second_id) {
                assert_eq!(summary.succeeded, 2);
                break;
            }
        }
        assert_eq!(
            remote.calls(),
            vec![
                (OperationKind::ProfileSave, "A".to_string()),
                (OperationKind::ProfileSave, "B".to_string()),
            ]
        );
        assert_eq!(manager.get_status().await.pending_operation_count, 0);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_other_kinds_still_sync_directly_while_one_is_queued() {
        let (manager, remote) = manager(options(true)).await;
        remote.fail_label("A");
        manager.record_mutation(profile("A")).await;

        let outcome = manager.record_mutation(crop("z3")).await;
        assert_eq!(outcome.delivery, Delivery::Synced);
        assert_eq!(manager.get_status().await.pending_operation_count, 1);
    }

    #[tokio::test]
    async fn test_starting_online_drains_previous_session_queue() {
        let dir = TempDir::new().unwrap();
        let store_dir = Some(dir.path().join("store"));

        let (first, _) = manager(ManagerOptions {
            store_dir: store_dir.clone(),
            ..options(false)
        })
        .await;
        first.record_mutation(profile("A")).await;
        first.record_mutation(profile("B")).await;
        first.shutdown().await;

        let (second, remote) = manager(ManagerOptions {
            store_dir,
            ..options(true)
        })
        .await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while second.get_status().await.pending_operation_count > 0 {
            assert!(tokio::time::Instant::now() < deadline, "queue not drained at startup");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(
            remote.calls(),
            vec![
                (OperationKind::ProfileSave, "A".to_string()),
                (OperationKind::ProfileSave, "B".to_string()),
            ]
        );
        assert!(second.get_status().await.last_sync_time.is_some());
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_operation_ids_keep_growing_across_restarts() {
        let dir = TempDir::new().unwrap();
        let opts = ManagerOptions {
            store_dir: Some(dir.path().join("store")),
            ..options(false)
        };

        let (first, _) = manager(opts.clone()).await;
        let before = first.record_mutation(feedback("slow app")).await;
        first.drain().await.unwrap();
        assert_eq!(first.get_status().await.pending_operation_count, 0);
        first.shutdown().await;

        let (second, _) = manager(opts).await;
        let after = second.record_mutation(feedback("fast app")).await;
        match (before.delivery, after.delivery) {
            (Delivery::Queued { operation_id: old }, Delivery::Queued { operation_id: new }) => {
                assert!(new > old)
            }
            other => panic!("expected both queued, got {:?}", other),
        }
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_now_covers_operations_queued_during_running_drain() {
        let (manager, remote) = manager(options(false)).await;
        manager.record_mutation(profile("A")).await;
        let gate = remote.install_gate();

        let manager = Arc::new(manager);
        let running = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.drain().await }
        });
        wait_until(|| remote.waiting() >= 1).await;

        manager.record_mutation(profile("B")).await;
        gate.add_permits(10);

        let summaries = manager.sync_now().await;
        assert!(running.await.unwrap().is_some());
        assert!(summaries.last().unwrap().succeeded >= 1);
        assert_eq!(manager.get_status().await.pending_operation_count, 0);
        assert_eq!(remote.calls().len(), 2);
    }
}
