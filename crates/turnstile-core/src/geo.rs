//! Great-circle geometry over a spherical Earth approximation.
//!
//! Accurate to within practical GPS error at city scale, which is all the
//! geofence evaluator needs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    #[error("coordinate out of range: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
}

/// A latitude/longitude pair in decimal degrees.
///
/// [`Coordinate::new`] is the validating constructor; deserialized values
/// (wire requests, site files) must be revalidated with [`Coordinate::validate`]
/// before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        let coord = Coordinate { lat, lng };
        coord.validate()?;
        Ok(coord)
    }

    /// Range check: lat ∈ [-90, 90], lng ∈ [-180, 180]. NaN fails both.
    pub fn validate(&self) -> Result<(), GeoError> {
        if (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng) {
            Ok(())
        } else {
            Err(GeoError::InvalidCoordinate { lat: self.lat, lng: self.lng })
        }
    }
}

/// Haversine distance in meters between two coordinates.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lng - a.lng).to_radians();

    let h = (dphi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);

    EARTH_RADIUS_M * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}
