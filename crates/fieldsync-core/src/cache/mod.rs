//! Versioned resource cache for static assets and prior query bodies.
//!
//! This module provides the `ResourceCache` for storing and retrieving
//! named payloads locally. Data is cached in JSON format under a version
//! tag; bumping the tag leaves older entries unaddressed.

pub mod resource;

pub use resource::{CachedData, ResourceCache};
