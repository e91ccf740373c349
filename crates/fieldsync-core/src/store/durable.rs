use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::Coordinates;

use super::{Collection, StoreError};

pub type RecordId = u64;

/// A stored record. The body is opaque JSON; the coordinates and timestamp
/// are lifted out so they can be indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    pub timestamp: DateTime<Utc>,
    pub body: Value,
}

impl Record {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// A record that has not been assigned an id yet.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub coordinates: Option<Coordinates>,
    pub timestamp: DateTime<Utc>,
    pub body: Value,
}

impl NewRecord {
    pub fn new(body: Value) -> Self {
        Self {
            coordinates: None,
            timestamp: Utc::now(),
            body,
        }
    }

    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, StoreError> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    pub fn at(mut self, coordinates: Option<Coordinates>) -> Self {
        self.coordinates = coordinates;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Secondary index lookups.
#[derive(Debug, Clone, Copy)]
pub enum IndexQuery {
    /// Records at the same coordinate slot.
    Coordinates(Coordinates),
    /// Records stamped at or after the instant.
    Since(DateTime<Utc>),
}

#[derive(Debug, Default, Deserialize)]
struct CollectionFile {
    next_id: RecordId,
    records: Vec<Record>,
}

#[derive(Serialize)]
struct CollectionFileRef<'a> {
    next_id: RecordId,
    records: Vec<&'a Record>,
}

#[derive(Debug, Default)]
struct CollectionData {
    next_id: RecordId,
    records: BTreeMap<RecordId, Record>,
    by_coordinates: HashMap<String, BTreeSet<RecordId>>,
    by_timestamp: BTreeSet<(DateTime<Utc>, RecordId)>,
}

impl CollectionData {
    fn from_file(file: CollectionFile) -> Self {
        let mut data = Self {
            next_id: file.next_id,
            ..Default::default()
        };
        for record in file.records {
            data.next_id = data.next_id.max(record.id + 1);
            data.insert(record);
        }
        data
    }

    fn file_view(&self) -> CollectionFileRef<'_> {
        CollectionFileRef {
            next_id: self.next_id,
            records: self.records.values().collect(),
        }
    }

    fn insert(&mut self, record: Record) {
        if let Some(ref coordinates) = record.coordinates {
            self.by_coordinates
                .entry(coordinates.index_key())
                .or_default()
                .insert(record.id);
        }
        self.by_timestamp.insert((record.timestamp, record.id));
        self.records.insert(record.id, record);
    }

    fn remove(&mut self, id: RecordId) -> Option<Record> {
        let record = self.records.remove(&id)?;
        if let Some(ref coordinates) = record.coordinates {
            let key = coordinates.index_key();
            if let Some(ids) = self.by_coordinates.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_coordinates.remove(&key);
                }
            }
        }
        self.by_timestamp.remove(&(record.timestamp, id));
        Some(record)
    }

    fn query(&self, query: Option<IndexQuery>) -> Vec<Record> {
        let mut records: Vec<Record> = match query {
            None => self.records.values().cloned().collect(),
            Some(IndexQuery::Coordinates(coordinates)) => self
                .by_coordinates
                .get(&coordinates.index_key())
                .map(|ids| ids.iter().filter_map(|id| self.records.get(id)).cloned().collect())
                .unwrap_or_default(),
            Some(IndexQuery::Since(since)) => self
                .by_timestamp
                .range((since, 0)..)
                .filter_map(|(_, id)| self.records.get(id))
                .cloned()
                .collect(),
        };
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        records
    }
}

#[derive(Debug, Clone)]
enum Backend {
    Disk(PathBuf),
    Memory,
}

#[derive(Debug, Serialize, Deserialize)]
struct Setting {
    key: String,
    value: Value,
}

/// Indexed collections persisted as one JSON file each.
///
/// All access goes through one async mutex, so each call is atomic with
/// respect to the others. Multi-call sequences are not.
pub struct DurableStore {
    backend: Backend,
    // None once closed
    collections: Mutex<Option<HashMap<Collection, CollectionData>>>,
}

impl DurableStore {
    /// Open (or create) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::unavailable("Failed to create store directory", e))?;

        let mut collections = HashMap::new();
        for collection in Collection::ALL {
            collections.insert(collection, Self::load_collection(&dir, collection).await?);
        }

        debug!(dir = %dir.display(), "Durable store opened");
        Ok(Self {
            backend: Backend::Disk(dir),
            collections: Mutex::new(Some(collections)),
        })
    }

    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        let collections = Collection::ALL
            .into_iter()
            .map(|c| (c, CollectionData::default()))
            .collect();
        Self {
            backend: Backend::Memory,
            collections: Mutex::new(Some(collections)),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::Disk(_))
    }

    /// Mark the store uninitialized; later calls fail with `StorageUnavailable`.
    pub async fn close(&self) {
        *self.collections.lock().await = None;
        debug!("Durable store closed");
    }

    fn collection_path(dir: &Path, collection: Collection) -> PathBuf {
        dir.join(format!("{}.json", collection.file_stem()))
    }

    fn not_initialized() -> StoreError {
        StoreError::StorageUnavailable("store is not initialized".to_string())
    }

    async fn load_collection(dir: &Path, collection: Collection) -> Result<CollectionData, StoreError> {
        let path = Self::collection_path(dir, collection);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CollectionData::default()),
            Err(e) => {
                return Err(StoreError::unavailable(
                    &format!("Failed to read collection {}", collection),
                    e,
                ))
            }
        };

        match serde_json::from_str::<CollectionFile>(&contents) {
            Ok(file) => Ok(CollectionData::from_file(file)),
            Err(e) => {
                // Keep the bytes for inspection rather than overwriting them on the next put
                let aside = path.with_extension("json.corrupt");
                warn!(collection = %collection, error = %e, "Collection file unreadable, moving aside");
                tokio::fs::rename(&path, &aside)
                    .await
                    .map_err(|e| StoreError::unavailable("Failed to move corrupt collection aside", e))?;
                Ok(CollectionData::default())
            }
        }
    }

    async fn persist(&self, collection: Collection, data: &CollectionData) -> Result<(), StoreError> {
        let dir = match self.backend {
            Backend::Memory => return Ok(()),
            Backend::Disk(ref dir) => dir,
        };

        let contents = serde_json::to_string(&data.file_view())?;
        let path = Self::collection_path(dir, collection);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| StoreError::unavailable(&format!("Failed to write collection {}", collection), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::unavailable(&format!("Failed to replace collection {}", collection), e))?;
        Ok(())
    }

    /// Insert a record and return its id.
    ///
    /// The write is rolled back in memory if it cannot be persisted.
    pub async fn put(&self, collection: Collection, record: NewRecord) -> Result<RecordId, StoreError> {
        let mut guard = self.collections.lock().await;
        let collections = guard.as_mut().ok_or_else(Self::not_initialized)?;
        let data = collections.entry(collection).or_default();

        let id = data.next_id;
        data.next_id += 1;
        data.insert(Record {
            id,
            coordinates: record.coordinates,
            timestamp: record.timestamp,
            body: record.body,
        });

        if let Err(e) = self.persist(collection, data).await {
            data.remove(id);
            data.next_id = id;
            warn!(collection = %collection, error = %e, "Put rolled back");
            return Err(e);
        }

        debug!(collection = %collection, id, "Record stored");
        Ok(id)
    }

    /// All records of a collection, optionally narrowed by a secondary index,
    /// ordered by timestamp then id.
    pub async fn get_all(
        &self,
        collection: Collection,
        query: Option<IndexQuery>,
    ) -> Result<Vec<Record>, StoreError> {
        let guard = self.collections.lock().await;
        let collections = guard.as_ref().ok_or_else(Self::not_initialized)?;
        Ok(collections
            .get(&collection)
            .map(|data| data.query(query))
            .unwrap_or_default())
    }

    pub async fn count(&self, collection: Collection) -> Result<usize, StoreError> {
        let guard = self.collections.lock().await;
        let collections = guard.as_ref().ok_or_else(Self::not_initialized)?;
        Ok(collections.get(&collection).map(|d| d.records.len()).unwrap_or(0))
    }

    /// Remove a record. Removing an id that does not exist is a no-op.
    pub async fn delete(&self, collection: Collection, id: RecordId) -> Result<(), StoreError> {
        let mut guard = self.collections.lock().await;
        let collections = guard.as_mut().ok_or_else(Self::not_initialized)?;
        let Some(data) = collections.get_mut(&collection) else {
            return Ok(());
        };
        let Some(removed) = data.remove(id) else {
            return Ok(());
        };

        if let Err(e) = self.persist(collection, data).await {
            data.insert(removed);
            warn!(collection = %collection, id, error = %e, "Delete rolled back");
            return Err(e);
        }

        debug!(collection = %collection, id, "Record deleted");
        Ok(())
    }

    // ===== Settings =====

    /// Replace the value stored under `key`.
    pub async fn put_setting<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let setting = Setting {
            key: key.to_string(),
            value: serde_json::to_value(value)?,
        };
        let stale = self.setting_ids(key).await?;
        self.put(Collection::Settings, NewRecord::from_serialize(&setting)?)
            .await?;
        for id in stale {
            self.delete(Collection::Settings, id).await?;
        }
        Ok(())
    }

    pub async fn get_setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let latest = self
            .get_all(Collection::Settings, None)
            .await?
            .into_iter()
            .filter_map(|r| r.decode::<Setting>().ok())
            .filter(|s| s.key == key)
            .last();

        match latest {
            Some(setting) => Ok(Some(serde_json::from_value(setting.value)?)),
            None => Ok(None),
        }
    }

    async fn setting_ids(&self, key: &str) -> Result<Vec<RecordId>, StoreError> {
        Ok(self
            .get_all(Collection::Settings, None)
            .await?
            .into_iter()
            .filter(|r| r.body.get("key").and_then(Value::as_str) == Some(key))
            .map(|r| r.id)
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
