//! Offline operation queue and replay.
//!
//! Mutations made while not online are appended to the `OperationQueue`.
//! When connectivity returns the `SyncEngine` drains a snapshot of the queue:
//! one pass at a time, same-kind operations in order, failures left queued
//! for the next pass.

pub mod engine;
pub mod queue;

pub use engine::{OperationOutcome, OutcomeStatus, SyncEngine, SyncSummary};
pub use queue::{OperationQueue, PendingEntry};
