//! Data models for the offline data manager.
//!
//! This module contains the data structures shared by every component:
//!
//! - `Coordinates`: a latitude/longitude pair and its cache index key
//! - `DataType`, `Quality`, `Readings`, `DataPoint`: environmental payloads
//!   and the traceability tags that travel with them
//! - `CacheEntry`: the persisted form of a data point
//! - `Operation`, `QueuedOperation`: user mutations waiting to be synced

pub mod data;
pub mod location;
pub mod operation;

pub use data::{CacheEntry, DataPoint, DataType, Quality, Readings};
pub use location::Coordinates;
pub use operation::{
    Achievement, CropData, FarmProfile, Feedback, Operation, OperationKind, QueuedOperation,
};
