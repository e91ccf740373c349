//! Durable key/value store with indexed collections.
//!
//! This module provides the `DurableStore` that persists cached
//! remote-sensing/weather records, user data, the pending-operation queue and
//! settings. Each collection is one JSON file; secondary indexes by
//! coordinates and by timestamp are rebuilt in memory at open.
//!
//! Storage failures surface as `StoreError::StorageUnavailable` and callers
//! carry on without persistence.

pub mod collection;
pub mod durable;
pub mod error;

pub use collection::Collection;
pub use durable::{DurableStore, IndexQuery, NewRecord, Record, RecordId};
pub use error::StoreError;
