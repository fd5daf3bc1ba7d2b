//! Great-circle distance.

use crate::error::VectorError;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Build a point, rejecting non-finite or out-of-range coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, VectorError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(VectorError::InvalidInput(format!(
                "latitude {} outside [-90, 90]",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(VectorError::InvalidInput(format!(
                "longitude {} outside [-180, 180]",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Haversine distance in kilometres between two points given in degrees.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push `a` past 1 near antipodes.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        assert_eq!(haversine_km(12.5, -4.0, 12.5, -4.0), 0.0);
    }

    #[test]
    fn test_one_degree_on_equator() {
        // 2πR / 360
        let expected = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;
        assert!((haversine_km(0.0, 0.0, 0.0, 1.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_antipodes_stay_finite() {
        let half_circumference = EARTH_RADIUS_KM * std::f64::consts::PI;
        for (lat, lng) in [(0.0, 0.0), (45.0, 10.0), (-33.9249, 18.4241), (89.9, -120.0), (12.3456, 179.9)] {
            let anti_lng = if lng > 0.0 { lng - 180.0 } else { lng + 180.0 };
            let d = haversine_km(lat, lng, -lat, anti_lng);
            assert!(d.is_finite(), "NaN for ({lat}, {lng})");
            assert!((d - half_circumference).abs() < 1e-3);
        }
    }

    #[test]
    fn test_symmetric() {
        let a = haversine_km(-26.2041, 28.0473, -33.9249, 18.4241);
        let b = haversine_km(-33.9249, 18.4241, -26.2041, 28.0473);
        assert_eq!(a, b);
        // Johannesburg to Cape Town
        assert!((a - 1261.0).abs() < 5.0);
    }

    #[test]
    fn test_antipodes() {
        let d = haversine_km(0.0, 0.0, 0.0, 180.0);
        assert!((d - EARTH_RADIUS_KM * std::f64::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn test_point_validation() {
        assert!(GeoPoint::new(45.0, 90.0).is_ok());
        assert!(GeoPoint::new(90.5, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -181.0).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }
}
