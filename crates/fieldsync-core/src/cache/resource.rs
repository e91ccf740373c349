use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::utils::format_age;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    /// Logical resource name, checked on read.
    pub name: String,
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(name: &str, data: T) -> Self {
        Self {
            name: name.to_string(),
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.cached_at
    }

    pub fn age_display(&self) -> String {
        format_age(self.cached_at, Utc::now())
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }
}

/// Content-addressed JSON files under `<root>/<version>/`.
#[derive(Debug, Clone)]
pub struct ResourceCache {
    root: PathBuf,
    version: String,
}

impl ResourceCache {
    pub fn new(root: PathBuf, version: &str) -> Result<Self> {
        let cache = Self {
            root,
            version: version.to_string(),
        };
        std::fs::create_dir_all(cache.version_dir())
            .with_context(|| format!("Failed to create resource cache for version {}", version))?;
        Ok(cache)
    }

    fn version_dir(&self) -> PathBuf {
        self.root.join(&self.version)
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.version_dir()
            .join(format!("{:016x}.json", xxh3_64(name.as_bytes())))
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cached resource: {}", name))?;

        let cached: CachedData<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cached resource: {}", name))?;

        if cached.name != name {
            warn!(name, stored = %cached.name, "Resource cache key collision");
            return Ok(None);
        }

        Ok(Some(cached))
    }

    /// Store a payload, replacing any previous entry wholesale.
    pub fn cache_response<T: Serialize>(&self, name: &str, payload: &T) -> Result<()> {
        let cached = CachedData::new(name, payload);
        let path = self.cache_path(name);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(&cached)?;
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write cached resource: {}", name))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace cached resource: {}", name))?;
        debug!(name, version = %self.version, "Resource cached");
        Ok(())
    }

    /// The cached payload for `name`, regardless of age.
    pub fn fetch_cached<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.fetch_entry(name).map(|cached| cached.data)
    }

    /// The cached payload for `name` if younger than `max_age`.
    pub fn fetch_fresh<T: DeserializeOwned>(&self, name: &str, max_age: Duration) -> Option<T> {
        self.fetch_entry(name)
            .filter(|cached| !cached.is_stale(max_age))
            .map(|cached| cached.data)
    }

    /// Helper to load an entry and log errors without failing
    pub fn fetch_entry<T: DeserializeOwned>(&self, name: &str) -> Option<CachedData<T>> {
        match self.load(name) {
            Ok(cached) => cached,
            Err(e) => {
                debug!(name, error = %e, "Failed to load cached resource");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
