//! # Location Descriptors
//!
//! Pickup and dropoff are address text plus optional coordinates. The
//! orchestrator never routes on them; it only validates and forwards them.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Validated constructor: latitude in [-90, 90], longitude in [-180, 180].
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoreError> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    /// Great-circle distance in meters (haversine, mean Earth radius).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();
        let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
    }

    fn validate(&self) -> Result<(), CoreError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoreError::InvalidLocation(format!(
                "latitude out of range: {}",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(CoreError::InvalidLocation(format!(
                "longitude out of range: {}",
                self.lng
            )));
        }
        Ok(())
    }
}

/// A pickup, dropoff, or reported position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Human-readable address text.
    pub address: String,
    /// Optional coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<GeoPoint>,
}

impl Location {
    /// An address-only location.
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            coordinates: None,
        }
    }

    /// An address with coordinates.
    pub fn with_coordinates(address: impl Into<String>, point: GeoPoint) -> Self {
        Self {
            address: address.into(),
            coordinates: Some(point),
        }
    }

    /// Validate that the address is non-blank and coordinates are in range.
    ///
    /// Deserialized locations bypass the constructors, so callers validate
    /// at the boundary.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.address.trim().is_empty() {
            return Err(CoreError::InvalidLocation("address must not be empty".to_string()));
        }
        if let Some(point) = &self.coordinates {
            point.validate()?;
        }
        Ok(())
    }
}
