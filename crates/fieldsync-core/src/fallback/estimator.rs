use std::sync::Mutex;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::data::SOURCE_ESTIMATOR;
use crate::models::{Coordinates, DataPoint, DataType, Quality, Readings};

/// Edge of the tropics (Tropic of Cancer/Capricorn), degrees.
const TROPICAL_LIMIT_DEG: f64 = 23.5;

/// Poleward edge of the mid-latitude band, degrees.
const MID_LATITUDE_LIMIT_DEG: f64 = 45.0;

/// Temperature model: `offset + amplitude * cos(lat)`.
/// Gives ~28 °C at the equator and -10 °C at the poles.
const TEMPERATURE_OFFSET_C: f64 = -10.0;
const TEMPERATURE_AMPLITUDE_C: f64 = 38.0;
const TEMPERATURE_JITTER_C: f64 = 2.0;

const HUMIDITY_COASTAL_PCT: f64 = 75.0;
const HUMIDITY_INTERIOR_PCT: f64 = 55.0;
const HUMIDITY_JITTER_PCT: f64 = 5.0;

/// Longitudes whose whole-degree part mod 10 falls below this are "coastal".
const COASTAL_MODULUS: i64 = 10;
const COASTAL_THRESHOLD: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatitudeBand {
    Tropical,
    MidLatitude,
    HighLatitude,
}

impl LatitudeBand {
    pub fn of(lat: f64) -> Self {
        let lat = lat.abs();
        if lat < TROPICAL_LIMIT_DEG {
            LatitudeBand::Tropical
        } else if lat <= MID_LATITUDE_LIMIT_DEG {
            LatitudeBand::MidLatitude
        } else {
            LatitudeBand::HighLatitude
        }
    }

    /// Volumetric soil moisture baseline.
    fn soil_moisture(&self) -> f64 {
        match self {
            LatitudeBand::Tropical => 0.40,
            LatitudeBand::MidLatitude => 0.30,
            LatitudeBand::HighLatitude => 0.20,
        }
    }

    /// (NDVI, EVI) baseline.
    fn vegetation(&self) -> (f64, f64) {
        match self {
            LatitudeBand::Tropical => (0.75, 0.50),
            LatitudeBand::MidLatitude => (0.55, 0.35),
            LatitudeBand::HighLatitude => (0.35, 0.22),
        }
    }

    /// Daily precipitation baseline, mm.
    fn precipitation_mm(&self) -> f64 {
        match self {
            LatitudeBand::Tropical => 6.0,
            LatitudeBand::MidLatitude => 2.5,
            LatitudeBand::HighLatitude => 1.2,
        }
    }
}

fn is_coastal(lon: f64) -> bool {
    (lon.abs().floor() as i64) % COASTAL_MODULUS < COASTAL_THRESHOLD
}

/// Produces estimated data points. Performs no I/O.
pub struct FallbackEstimator {
    rng: Mutex<StdRng>,
}

impl Default for FallbackEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackEstimator {
    /// Jitter seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible jitter.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn jitter(&self, bound: f64) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(-bound..=bound),
            // A panic elsewhere while holding the lock; the baseline is still usable
            Err(_) => 0.0,
        }
    }

    pub fn estimate(&self, coordinates: Coordinates, data_type: &DataType) -> DataPoint {
        let band = LatitudeBand::of(coordinates.lat);

        let readings = match data_type {
            DataType::SoilMoisture => Readings::SoilMoisture {
                soil_moisture: band.soil_moisture(),
            },
            DataType::VegetationIndex => {
                let (ndvi, evi) = band.vegetation();
                Readings::Vegetation { ndvi, evi }
            }
            DataType::Weather => {
                let baseline_temp = TEMPERATURE_OFFSET_C
                    + TEMPERATURE_AMPLITUDE_C * coordinates.lat.to_radians().cos();
                let baseline_humidity = if is_coastal(coordinates.lon) {
                    HUMIDITY_COASTAL_PCT
                } else {
                    HUMIDITY_INTERIOR_PCT
                };
                Readings::Weather {
                    temperature_c: baseline_temp + self.jitter(TEMPERATURE_JITTER_C),
                    humidity_pct: (baseline_humidity + self.jitter(HUMIDITY_JITTER_PCT))
                        .clamp(0.0, 100.0),
                    precipitation_mm: band.precipitation_mm(),
                }
            }
            DataType::Unsupported(name) => {
                return DataPoint::unavailable(
                    coordinates,
                    data_type.clone(),
                    format!("no estimate model for data type '{}'", name),
                );
            }
        };

        DataPoint {
            coordinates,
            data_type: data_type.clone(),
            readings,
            quality: Quality::Estimated,
            source: SOURCE_ESTIMATOR.to_string(),
            captured_at: Utc::now(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
