//! GPS coordinates and location-history waypoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in kilometres (haversine)
const EARTH_RADIUS_KM: f64 = 6371.0;

/// WGS84 coordinate pair in decimal degrees
///
/// Serialized as `{"lat": .., "lng": ..}`, the same shape AI backends are
/// asked to return.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinates {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
}

impl GpsCoordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both components are finite and inside the WGS84 ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Parse the `geo:lat,lng` form used by location-history exports
    pub fn from_geo_string(value: &str) -> Option<Self> {
        let coords = value.strip_prefix("geo:")?;
        let (lat, lng) = coords.split_once(',')?;
        let gps = Self::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?);
        gps.is_valid().then_some(gps)
    }

    /// Great-circle distance in kilometres
    pub fn distance_to_km(&self, other: &GpsCoordinates) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlng = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }
}

impl fmt::Display for GpsCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// One timestamped GPS sample from a location-history track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub timestamp: DateTime<Utc>,
    pub gps: GpsCoordinates,
    /// Visit/place label carried by the history export, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
}

impl Waypoint {
    pub fn new(timestamp: DateTime<Utc>, gps: GpsCoordinates) -> Self {
        Self {
            timestamp,
            gps,
            place_name: None,
        }
    }

    pub fn with_place_name(mut self, place_name: impl Into<String>) -> Self {
        self.place_name = Some(place_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_string_parsing() {
        let gps = GpsCoordinates::from_geo_string("geo:50.042305,15.760400").unwrap();
        assert_eq!(gps.latitude, 50.042305);
        assert_eq!(gps.longitude, 15.7604);

        assert!(GpsCoordinates::from_geo_string("50.0,15.0").is_none());
        assert!(GpsCoordinates::from_geo_string("geo:abc,15.0").is_none());
        assert!(GpsCoordinates::from_geo_string("geo:95.0,15.0").is_none());
    }

    #[test]
    fn test_distance_prague_to_brno() {
        let prague = GpsCoordinates::new(50.0755, 14.4378);
        let brno = GpsCoordinates::new(49.1951, 16.6068);

        let distance = prague.distance_to_km(&brno);
        assert!((distance - 185.0).abs() < 5.0, "got {distance}");
        assert_eq!(prague.distance_to_km(&prague), 0.0);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(GpsCoordinates::new(48.8584, 2.2945)).unwrap();
        assert_eq!(json, serde_json::json!({"lat": 48.8584, "lng": 2.2945}));
    }

    #[test]
    fn test_display_six_decimals() {
        assert_eq!(GpsCoordinates::new(1.5, -2.25).to_string(), "1.500000, -2.250000");
    }
}
