//! Application configuration management.
//!
//! Configuration is stored at `~/.config/fieldsync/config.json` and can be
//! overridden per run with `FIELDSYNC_API_URL`, `FIELDSYNC_DATA_DIR` and
//! `FIELDSYNC_CACHE_VERSION`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::connectivity::ProbeSettings;
use crate::models::DataType;

/// Application name used for config/data directory paths
const APP_NAME: &str = "fieldsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_URL: &str = "http://localhost:8080/api";
const DEFAULT_CACHE_VERSION: &str = "v1";

const HOUR_SECS: u64 = 60 * 60;
const DAY_SECS: u64 = 24 * HOUR_SECS;

/// How long a cached value of each data type stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxAgePolicy {
    pub weather_secs: u64,
    pub soil_moisture_secs: u64,
    pub vegetation_index_secs: u64,
}

impl Default for MaxAgePolicy {
    fn default() -> Self {
        Self {
            weather_secs: HOUR_SECS,
            soil_moisture_secs: DAY_SECS,
            vegetation_index_secs: 7 * DAY_SECS,
        }
    }
}

impl MaxAgePolicy {
    /// `None` for types that are never cached.
    pub fn for_type(&self, data_type: &DataType) -> Option<chrono::Duration> {
        let secs = match data_type {
            DataType::Weather => self.weather_secs,
            DataType::SoilMoisture => self.soil_moisture_secs,
            DataType::VegetationIndex => self.vegetation_index_secs,
            DataType::Unsupported(_) => return None,
        };
        chrono::Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX))
            .or(Some(chrono::Duration::MAX))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    /// Root for the store, resource cache and logs. Platform data dir when unset.
    pub data_dir: Option<PathBuf>,
    pub cache_version: String,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_age: MaxAgePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            data_dir: None,
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            probe_interval_secs: 30,
            probe_timeout_secs: 5,
            request_timeout_secs: 30,
            max_age: MaxAgePolicy::default(),
        }
    }
}

impl Config {
    /// Load the config file (defaults when absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty("FIELDSYNC_API_URL") {
            self.api_base_url = url;
        }
        if let Some(dir) = non_empty("FIELDSYNC_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(version) = non_empty("FIELDSYNC_CACHE_VERSION") {
            self.cache_version = version;
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn store_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("store"))
    }

    pub fn resource_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("resources"))
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("logs"))
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            interval: Duration::from_secs(self.probe_interval_secs.max(1)),
            timeout: Duration::from_secs(self.probe_timeout_secs.max(1)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
