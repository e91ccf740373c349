//! fieldsync core - offline data management for the farm simulation.
//!
//! This library keeps the app working without network access: it caches
//! environmental data and static resources locally, queues user mutations
//! made while offline, replays them when connectivity returns, and serves
//! plausible estimates when nothing better is available.
//!
//! Start with [`OfflineManager::init`].

pub mod api;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod fallback;
pub mod manager;
pub mod models;
pub mod store;
pub mod sync;
pub mod utils;

#[cfg(test)]
pub mod test_helpers;

pub use api::{ApiClient, ApiError};
pub use config::{Config, MaxAgePolicy};
pub use connectivity::{ConnectivityState, Transition};
pub use error::OfflineError;
pub use manager::{
    Collaborators, Delivery, ManagerOptions, ManagerStatus, MutationOutcome, OfflineManager,
};
pub use models::{Coordinates, DataPoint, DataType, Operation, Quality, Readings};
pub use sync::SyncSummary;
