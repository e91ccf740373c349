use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::api::{dispatch, Synchronizer};
use crate::error::OfflineError;
use crate::models::OperationKind;
use crate::store::DurableStore;

use super::queue::{OperationQueue, PendingEntry};

/// Settings key for the last completed drain.
const LAST_SYNC_KEY: &str = "last_sync_time";

/// Summaries buffered per subscriber.
const SUMMARY_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Synced,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub operation_id: u64,
    pub kind: OperationKind,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl OperationOutcome {
    pub fn is_synced(&self) -> bool {
        self.status == OutcomeStatus::Synced
    }
}

/// User-visible result of one drain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<OperationOutcome>,
}

impl SyncSummary {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    /// `PartialSyncFailure` when anything stayed queued.
    pub fn partial_failure(&self) -> Option<OfflineError> {
        (self.failed > 0).then(|| OfflineError::PartialSyncFailure {
            attempted: self.attempted(),
            failed: self.failed,
        })
    }

    pub fn message(&self) -> String {
        match self.attempted() {
            0 => "Nothing to sync".to_string(),
            _ if self.failed == 0 => format!("Synced {} pending change(s)", self.succeeded),
            _ => format!(
                "Synced {} change(s), {} failed and will retry",
                self.succeeded, self.failed
            ),
        }
    }
}

/// One drain pass. Lives only inside `SyncEngine::run_pass`.
struct SyncSession {
    started_at: DateTime<Utc>,
    outcomes: Vec<OperationOutcome>,
}

impl SyncSession {
    fn start() -> Self {
        Self {
            started_at: Utc::now(),
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, outcomes: impl IntoIterator<Item = OperationOutcome>) {
        self.outcomes.extend(outcomes);
    }

    fn finish(mut self) -> SyncSummary {
        self.outcomes.sort_by_key(|o| o.operation_id);
        let succeeded = self.outcomes.iter().filter(|o| o.is_synced()).count();
        SyncSummary {
            started_at: self.started_at,
            finished_at: Utc::now(),
            succeeded,
            failed: self.outcomes.len() - succeeded,
            outcomes: self.outcomes,
        }
    }
}

/// Clears the in-progress flag when the drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replays queued operations against the remote.
pub struct SyncEngine {
    queue: Arc<OperationQueue>,
    store: Arc<DurableStore>,
    synchronizer: Arc<dyn Synchronizer>,
    in_progress: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    last_summary: Mutex<Option<SyncSummary>>,
    summaries: broadcast::Sender<SyncSummary>,
    // Woken each time a pass ends and the in-progress flag is clear
    idle: Notify,
}

impl SyncEngine {
    pub async fn new(
        queue: Arc<OperationQueue>,
        store: Arc<DurableStore>,
        synchronizer: Arc<dyn Synchronizer>,
    ) -> Self {
        let last_sync = match store.get_setting::<DateTime<Utc>>(LAST_SYNC_KEY).await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "No persisted last sync time");
                None
            }
        };
        let (summaries, _) = broadcast::channel(SUMMARY_CHANNEL_CAPACITY);

        Self {
            queue,
            store,
            synchronizer,
            in_progress: AtomicBool::new(false),
            last_sync: Mutex::new(last_sync),
            last_summary: Mutex::new(None),
            summaries,
            idle: Notify::new(),
        }
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_draining(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncSummary> {
        self.summaries.subscribe()
    }

    /// Replay everything queued at the moment of the call.
    ///
    /// Returns `None` when another drain is already running (the request is
    /// coalesced onto it). Never fails: operations that could not be synced
    /// simply stay queued.
    pub async fn drain(&self) -> Option<SyncSummary> {
        let Some(guard) = DrainGuard::acquire(&self.in_progress) else {
            debug!("Drain already in progress, coalescing");
            return None;
        };

        let summary = self.run_pass().await;
        *self.last_summary.lock().unwrap_or_else(PoisonError::into_inner) = Some(summary.clone());
        drop(guard);
        self.idle.notify_waiters();

        Some(summary)
    }

    /// Replay everything queued at the moment of the call, waiting out a
    /// pass already in flight first.
    ///
    /// Returns the summaries of every pass that ran meanwhile, this call's
    /// own pass last.
    pub async fn drain_when_idle(&self) -> Vec<SyncSummary> {
        let mut summaries = Vec::new();
        loop {
            let mut idle = pin!(self.idle.notified());
            // Registered before trying, so a pass ending in between still wakes us
            idle.as_mut().enable();

            if let Some(summary) = self.drain().await {
                summaries.push(summary);
                return summaries;
            }

            idle.await;
            let finished = self
                .last_summary
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            summaries.extend(finished);
        }
    }

    async fn run_pass(&self) -> SyncSummary {
        let mut session = SyncSession::start();
        let snapshot = self.queue.snapshot().await;
        if snapshot.is_empty() {
            debug!("Queue empty, nothing to drain");
            return session.finish();
        }

        info!(count = snapshot.len(), "Draining pending operations");

        // Same-kind operations stay in enqueue order; kinds run side by side
        let mut groups: BTreeMap<OperationKind, Vec<PendingEntry>> = BTreeMap::new();
        for entry in snapshot {
            groups.entry(entry.queued.kind()).or_default().push(entry);
        }

        let results = join_all(groups.into_values().map(|entries| self.sync_group(entries))).await;
        for outcomes in results {
            session.record(outcomes);
        }

        let summary = session.finish();
        self.record_sync_time(summary.started_at).await;

        match summary.partial_failure() {
            Some(e) => warn!(succeeded = summary.succeeded, error = %e, "Drain finished with failures"),
            None => info!(succeeded = summary.succeeded, "Drain finished"),
        }
        // No subscribers is fine
        let _ = self.summaries.send(summary.clone());

        summary
    }

    async fn sync_group(&self, entries: Vec<PendingEntry>) -> Vec<OperationOutcome> {
        let mut outcomes = Vec::with_capacity(entries.len());

        for entry in entries {
            let queued = &entry.queued;
            let status = match dispatch(self.synchronizer.as_ref(), &queued.operation).await {
                Ok(()) => {
                    if let Err(e) = self.queue.remove(&entry).await {
                        // Synced but still queued; the next drain re-sends it
                        warn!(id = queued.id, error = %e, "Could not remove synced operation");
                    }
                    debug!(id = queued.id, kind = %queued.kind(), "Operation synced");
                    OutcomeStatus::Synced
                }
                Err(e) => {
                    if e.is_rejection() {
                        warn!(id = queued.id, kind = %queued.kind(), error = %e, "Operation rejected, keeping it queued");
                    } else {
                        debug!(id = queued.id, kind = %queued.kind(), error = %e, "Operation not synced");
                    }
                    OutcomeStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };

            outcomes.push(OperationOutcome {
                operation_id: queued.id,
                kind: queued.kind(),
                status,
            });
        }

        outcomes
    }

    async fn record_sync_time(&self, started_at: DateTime<Utc>) {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(started_at);
        if let Err(e) = self.store.put_setting(LAST_SYNC_KEY, &started_at).await {
            warn!(error = %e, "Could not persist last sync time");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
