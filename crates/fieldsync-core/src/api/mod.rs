//! Remote API seams and their HTTP implementation.
//!
//! The manager only talks to the outside world through three traits:
//! `Synchronizer` (replaying queued mutations), `DataSource` (live
//! environmental data and static resources) and `Probe` (liveness).
//! `ApiClient` implements all three over JSON/HTTP.

pub mod client;
pub mod error;
pub mod traits;

pub use client::ApiClient;
pub use error::ApiError;
pub use traits::{dispatch, DataSource, Probe, Synchronizer};
