use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Decimal places kept when building a cache index key.
/// Four places is roughly 11 m at the equator, well under a farm zone.
const INDEX_KEY_PRECISION: usize = 4;

/// A point on the map, in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Key used by the store's coordinate index.
    pub fn index_key(&self) -> String {
        format!("{},{}", key_component(self.lat), key_component(self.lon))
    }

    /// Same location for caching purposes.
    pub fn same_slot(&self, other: &Coordinates) -> bool {
        self.index_key() == other.index_key()
    }
}

/// One rounded component. Values that round to zero from below lose their
/// sign so both sides of the equator/meridian share a slot.
fn key_component(value: f64) -> String {
    let rounded = format!("{:.prec$}", value, prec = INDEX_KEY_PRECISION);
    match rounded.strip_prefix('-') {
        Some(magnitude) if magnitude.bytes().all(|b| b == b'0' || b == b'.') => {
            magnitude.to_string()
        }
        _ => rounded,
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = if self.lat < 0.0 { 'S' } else { 'N' };
        let ew = if self.lon < 0.0 { 'W' } else { 'E' };
        write!(f, "{:.4}°{} {:.4}°{}", self.lat.abs(), ns, self.lon.abs(), ew)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_key_rounds_noise() {
        let a = Coordinates::new(5.0, 10.0);
        let b = Coordinates::new(5.000_01, 9.999_99);
        assert_eq!(a.index_key(), "5.0000,10.0000");
        assert!(a.same_slot(&b));
    }

    #[test]
    fn test_index_key_has_no_negative_zero() {
        let south = Coordinates::new(-0.000_01, -0.000_04);
        let north = Coordinates::new(0.000_01, 0.000_02);
        assert_eq!(south.index_key(), "0.0000,0.0000");
        assert!(south.same_slot(&north));
        assert_eq!(Coordinates::new(-0.5, -12.25).index_key(), "-0.5000,-12.2500");
    }

    #[test]
    fn test_index_key_distinguishes_nearby_zones() {
        let a = Coordinates::new(5.0, 10.0);
        let b = Coordinates::new(5.001, 10.0);
        assert!(!a.same_slot(&b));
    }

    #[test]
    fn test_display() {
        assert_eq!(Coordinates::new(-33.5, 151.25).to_string(), "33.5000°S 151.2500°E");
    }
}
