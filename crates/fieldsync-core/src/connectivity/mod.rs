//! Online/offline tracking.
//!
//! The `ConnectivityMonitor` owns the process-wide `ConnectivityState`. It
//! consumes platform connectivity signals from a channel, probes the backend
//! on a fixed interval, and publishes every `Transition` to subscribers.

pub mod monitor;
pub mod state;

pub use monitor::{ConnectivityMonitor, ProbeSettings};
pub use state::{next_state, ConnectivityEvent, ConnectivityState, Transition};
