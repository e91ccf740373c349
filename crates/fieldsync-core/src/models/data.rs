//! Environmental data payloads and their traceability tags.
//!
//! Every value handed to the application carries a `Quality` and a `source`
//! label so the UI can tell a real observation from a model guess.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

use super::Coordinates;

/// Source label for values produced by the fallback estimator.
pub const SOURCE_ESTIMATOR: &str = "fallback:latitude-band";

/// Source label for values served from the durable store.
pub const SOURCE_CACHE: &str = "cache";

/// Source label for payloads that carry no value at all.
pub const SOURCE_UNAVAILABLE: &str = "unavailable";

/// Kind of environmental data a caller can request.
///
/// Parsing is lenient: the remote-sensing product names used by the farm
/// simulation (`smap`, `modis`) and the descriptive names both map to the
/// same variant. Anything else is kept verbatim as `Unsupported`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    SoilMoisture,
    VegetationIndex,
    Weather,
    Unsupported(String),
}

impl DataType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "smap" | "soil-moisture" | "soil_moisture" => DataType::SoilMoisture,
            "modis" | "ndvi" | "vegetation-index" | "vegetation_index" => {
                DataType::VegetationIndex
            }
            "weather" => DataType::Weather,
            _ => DataType::Unsupported(s.to_string()),
        }
    }

    /// Canonical wire name.
    pub fn as_str(&self) -> &str {
        match self {
            DataType::SoilMoisture => "smap",
            DataType::VegetationIndex => "modis",
            DataType::Weather => "weather",
            DataType::Unsupported(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, DataType::Unsupported(_))
    }
}

impl From<String> for DataType {
    fn from(s: String) -> Self {
        DataType::parse(&s)
    }
}

impl From<DataType> for String {
    fn from(dt: DataType) -> Self {
        dt.as_str().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much a value can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Live observation from the remote service.
    Measured,
    /// A measured observation served from the local store.
    Cached,
    /// Synthesized by the fallback estimator.
    Estimated,
    /// No value exists for this request.
    Unavailable,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Measured => "measured",
            Quality::Cached => "cached",
            Quality::Estimated => "estimated",
            Quality::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The measured or estimated values for one data type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Readings {
    SoilMoisture {
        /// Volumetric water content, 0.0 to 1.0
        soil_moisture: f64,
    },
    Vegetation {
        ndvi: f64,
        evi: f64,
    },
    Weather {
        temperature_c: f64,
        humidity_pct: f64,
        precipitation_mm: f64,
    },
    Unavailable {
        reason: String,
    },
}

/// A single environmental value as handed to the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct DataPoint {
    pub coordinates: Coordinates,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub data_type: DataType,
    pub readings: Readings,
    pub quality: Quality,
    pub source: String,
    pub captured_at: DateTime<Utc>,
}

impl DataPoint {
    /// A live observation.
    pub fn measured(
        coordinates: Coordinates,
        data_type: DataType,
        readings: Readings,
        source: impl Into<String>,
    ) -> Self {
        Self {
            coordinates,
            data_type,
            readings,
            quality: Quality::Measured,
            source: source.into(),
            captured_at: Utc::now(),
        }
    }

    /// An explicit "no value" payload. Never carries a number.
    pub fn unavailable(coordinates: Coordinates, data_type: DataType, reason: impl Into<String>) -> Self {
        Self {
            coordinates,
            data_type,
            readings: Readings::Unavailable {
                reason: reason.into(),
            },
            quality: Quality::Unavailable,
            source: SOURCE_UNAVAILABLE.to_string(),
            captured_at: Utc::now(),
        }
    }

    /// Re-tag a stored payload for a cache hit.
    ///
    /// Measured values become `cached`; estimates stay `estimated` so a
    /// stored guess is never passed off as an observation.
    pub fn served_from_cache(mut self) -> Self {
        if self.quality == Quality::Measured {
            self.quality = Quality::Cached;
            self.source = format!("{} ({})", SOURCE_CACHE, self.source);
        }
        self
    }
}

/// Persisted form of a data point.
///
/// Entries are superseded by newer ones for the same slot, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub coordinates: Coordinates,
    pub data_type: DataType,
    pub payload: DataPoint,
    pub timestamp: DateTime<Utc>,
    pub quality: Quality,
}

impl CacheEntry {
    pub fn from_point(point: DataPoint) -> Self {
        Self {
            key: Self::slot_key(&point.coordinates, &point.data_type),
            coordinates: point.coordinates,
            data_type: point.data_type.clone(),
            timestamp: point.captured_at,
            quality: point.quality,
            payload: point,
        }
    }

    pub fn slot_key(coordinates: &Coordinates, data_type: &DataType) -> String {
        format!("{}@{}", data_type, coordinates.index_key())
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    /// Younger than `max_age`. Entries stamped in the future (clock skew)
    /// count as fresh.
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) < max_age
    }
}
