//! Plausible synthetic values for when nothing better is available.
//!
//! The estimator bands the globe by latitude and produces soil moisture,
//! vegetation index and weather baselines. Weather carries bounded jitter to
//! model natural variance; everything else is deterministic. Results are
//! always tagged `estimated` (or `unavailable` for unknown data types).

pub mod estimator;

pub use estimator::{FallbackEstimator, LatitudeBand};
