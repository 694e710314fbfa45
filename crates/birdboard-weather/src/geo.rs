//! Coordinate helpers.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Rounded to 4 decimal places, the precision the points endpoint accepts.
    pub fn rounded(&self) -> Self {
        Self {
            latitude: round4(self.latitude),
            longitude: round4(self.longitude),
        }
    }

    /// Great-circle distance to `other` in kilometres.
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Haversine great-circle distance between two points, in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_drift_is_metres() {
        let cached = Coordinates::new(29.6216, -95.6229);
        let reading = Coordinates::new(29.6217, -95.6230);
        let d = cached.distance_km(&reading);
        assert!(d > 0.010 && d < 0.020, "expected ~15 m, got {} km", d);
    }

    #[test]
    fn test_known_distance() {
        // Houston to Austin, roughly 235 km.
        let d = haversine_km(29.7604, -95.3698, 30.2672, -97.7431);
        assert!((d - 235.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn test_zero_distance() {
        let p = Coordinates::new(47.6062, -122.3321);
        assert_eq!(p.distance_km(&p), 0.0);
    }

    #[test]
    fn test_rounding() {
        let p = Coordinates::new(29.621_649, -95.622_951).rounded();
        assert_eq!(p, Coordinates::new(29.6216, -95.623));
    }
}
