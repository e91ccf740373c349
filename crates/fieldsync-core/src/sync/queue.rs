use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::OfflineError;
use crate::models::{Operation, OperationKind, QueuedOperation};
use crate::store::{Collection, DurableStore, NewRecord, RecordId, StoreError};

/// Settings key holding the next operation id, so ids are never reused
/// after the queue drains.
const NEXT_ID_KEY: &str = "next_operation_id";

/// Where a pending operation currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Stored(RecordId),
    /// Held in memory because the store refused it.
    Overflow,
}

/// A queued operation together with the handle needed to remove it.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub queued: QueuedOperation,
    slot: Slot,
}

/// FIFO of mutations waiting for the remote, backed by the
/// `PendingOperations` collection.
pub struct OperationQueue {
    store: Arc<DurableStore>,
    // Held across the write so ids reach the store in order
    next_id: tokio::sync::Mutex<u64>,
    overflow: Mutex<Vec<QueuedOperation>>,
}

impl OperationQueue {
    /// Open the queue, continuing the id sequence of this data directory.
    pub async fn open(store: Arc<DurableStore>) -> Self {
        let saved = match store.get_setting::<u64>(NEXT_ID_KEY).await {
            Ok(saved) => saved.unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "Could not read operation id counter");
                0
            }
        };
        let after_pending = match store.get_all(Collection::PendingOperations, None).await {
            Ok(records) => records
                .iter()
                .filter_map(|r| r.decode::<QueuedOperation>().ok())
                .map(|q| q.id + 1)
                .max()
                .unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "Could not read pending operations");
                0
            }
        };
        let next_id = saved.max(after_pending);

        debug!(next_id, "Operation queue opened");
        Self {
            store,
            next_id: tokio::sync::Mutex::new(next_id),
            overflow: Mutex::new(Vec::new()),
        }
    }

    /// Append an operation. Never fails: if the store refuses the write the
    /// operation is kept in memory for this session.
    pub async fn enqueue(&self, operation: Operation) -> QueuedOperation {
        let mut next_id = self.next_id.lock().await;
        let queued = QueuedOperation {
            id: *next_id,
            operation,
            enqueued_at: Utc::now(),
        };
        *next_id += 1;

        if let Err(e) = self.store.put_setting(NEXT_ID_KEY, &*next_id).await {
            debug!(error = %e, "Operation id counter not persisted");
        }

        match self.persist(&queued).await {
            Ok(record_id) => {
                debug!(id = queued.id, record_id, kind = %queued.kind(), "Operation queued");
            }
            Err(e) => {
                warn!(
                    id = queued.id,
                    kind = %queued.kind(),
                    error = %OfflineError::from(e),
                    "Queue not persisted, holding operation in memory"
                );
                self.overflow
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(queued.clone());
            }
        }

        queued
    }

    async fn persist(&self, queued: &QueuedOperation) -> Result<RecordId, StoreError> {
        let record = NewRecord::from_serialize(queued)?
            .at(queued.operation.coordinates())
            .with_timestamp(queued.enqueued_at);
        self.store.put(Collection::PendingOperations, record).await
    }

    /// Everything queued right now, in enqueue order.
    pub async fn snapshot(&self) -> Vec<PendingEntry> {
        let mut entries: Vec<PendingEntry> =
            match self.store.get_all(Collection::PendingOperations, None).await {
                Ok(records) => records
                    .into_iter()
                    .filter_map(|record| match record.decode::<QueuedOperation>() {
                        Ok(queued) => Some(PendingEntry {
                            queued,
                            slot: Slot::Stored(record.id),
                        }),
                        Err(e) => {
                            warn!(record_id = record.id, error = %e, "Skipping unreadable queued operation");
                            None
                        }
                    })
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "Could not read persisted queue");
                    Vec::new()
                }
            };

        entries.extend(
            self.overflow
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .map(|queued| PendingEntry {
                    queued,
                    slot: Slot::Overflow,
                }),
        );

        entries.sort_by_key(|e| e.queued.id);
        entries
    }

    /// Anything of `kind` still waiting.
    pub async fn has_pending(&self, kind: OperationKind) -> bool {
        self.snapshot().await.iter().any(|e| e.queued.kind() == kind)
    }

    pub async fn list(&self) -> Vec<QueuedOperation> {
        self.snapshot().await.into_iter().map(|e| e.queued).collect()
    }

    pub async fn len(&self) -> usize {
        let stored = match self.store.count(Collection::PendingOperations).await {
            Ok(count) => count,
            Err(e) => {
                debug!(error = %e, "Queue length without persisted entries");
                0
            }
        };
        stored + self.overflow.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop a synced entry.
    pub async fn remove(&self, entry: &PendingEntry) -> Result<(), StoreError> {
        match entry.slot {
            Slot::Stored(record_id) => {
                self.store
                    .delete(Collection::PendingOperations, record_id)
                    .await
            }
            Slot::Overflow => {
                self.overflow
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|q| q.id != entry.queued.id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{crop, profile};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let queue = OperationQueue::open(Arc::new(DurableStore::in_memory())).await;
        queue.enqueue(profile("A")).await;
        queue.enqueue(crop("z1")).await;
        queue.enqueue(profile("B")).await;

        let ids: Vec<u64> = queue.list().await.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn test_ids_continue_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = Arc::new(DurableStore::open(dir.path()).await.unwrap());
            let queue = OperationQueue::open(store).await;
            queue.enqueue(profile("A")).await;
            queue.enqueue(profile("B")).await;
        }

        let store = Arc::new(DurableStore::open(dir.path()).await.unwrap());
        let queue = OperationQueue::open(store).await;
        let queued = queue.enqueue(profile("C")).await;
        assert_eq!(queued.id, 2);
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_queue_drains() {
        let dir = TempDir::new().unwrap();
        let first = {
            let store = Arc::new(DurableStore::open(dir.path()).await.unwrap());
            let queue = OperationQueue::open(store).await;
            let queued = queue.enqueue(profile("A")).await;
            for entry in queue.snapshot().await {
                queue.remove(&entry).await.unwrap();
            }
            assert!(queue.is_empty().await);
            queued
        };

        let store = Arc::new(DurableStore::open(dir.path()).await.unwrap());
        let queue = OperationQueue::open(store).await;
        let second = queue.enqueue(profile("B")).await;
        assert!(second.id > first.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueues_are_stored_in_id_order() {
        let store = Arc::new(DurableStore::in_memory());
        let queue = Arc::new(OperationQueue::open(Arc::clone(&store)).await);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.enqueue(crop(&format!("z{}", i))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut records = store.get_all(Collection::PendingOperations, None).await.unwrap();
        records.sort_by_key(|r| r.id);
        let ids: Vec<u64> = records
            .iter()
            .map(|r| r.decode::<QueuedOperation>().unwrap().id)
            .collect();
        assert_eq!(ids, (0..16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_has_pending_by_kind() {
        let queue = OperationQueue::open(Arc::new(DurableStore::in_memory())).await;
        queue.enqueue(crop("z1")).await;
        assert!(queue.has_pending(OperationKind::CropDataUpdate).await);
        assert!(!queue.has_pending(OperationKind::ProfileSave).await);
    }

    #[tokio::test]
    async fn test_enqueue_survives_store_failure() {
        let store = Arc::new(DurableStore::in_memory());
        let queue = OperationQueue::open(Arc::clone(&store)).await;
        store.close().await;

        let queued = queue.enqueue(profile("A")).await;
        let snapshot = queue.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].queued, queued);

        queue.remove(&snapshot[0]).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_only_touches_given_entry() {
        let queue = OperationQueue::open(Arc::new(DurableStore::in_memory())).await;
        queue.enqueue(profile("A")).await;
        queue.enqueue(profile("B")).await;

        let snapshot = queue.snapshot().await;
        queue.remove(&snapshot[0]).await.unwrap();

        let remaining = queue.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, snapshot[1].queued.id);
    }
}
