//! Geographic coordinates used for weather lookups and station searches.

use crate::error::WxSenseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a geographical coordinate using latitude and longitude.
///
/// Latitude is the first element (index 0), and longitude is the second (index 1).
/// In TOML configuration files a `LatLon` is written as a two element array,
/// e.g. `Gmunden = [47.918, 13.799]`.
///
/// # Examples
///
/// ```
/// use wxsense::LatLon;
///
/// let weimar = LatLon(50.9808, 11.3290);
/// assert_eq!(weimar.lat(), 50.9808);
/// assert_eq!(weimar.lon(), 11.3290);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon(pub f64, pub f64);

impl LatLon {
    /// Creates a coordinate, rejecting values outside the valid latitude/longitude ranges.
    ///
    /// # Errors
    ///
    /// Returns [`WxSenseError::InvalidCoordinate`] if the latitude is outside `-90..=90`,
    /// the longitude is outside `-180..=180`, or either value is not finite.
    pub fn new(lat: f64, lon: f64) -> Result<Self, WxSenseError> {
        let coordinate = LatLon(lat, lon);
        coordinate.validate()?;
        Ok(coordinate)
    }

    pub fn lat(self) -> f64 {
        self.0
    }

    pub fn lon(self) -> f64 {
        self.1
    }

    /// Checks the coordinate ranges. Coordinates coming from config files are
    /// built without going through [`LatLon::new`], so callers validate them here.
    pub fn validate(self) -> Result<(), WxSenseError> {
        let valid = self.0.is_finite()
            && self.1.is_finite()
            && (-90.0..=90.0).contains(&self.0)
            && (-180.0..=180.0).contains(&self.1);
        if valid {
            Ok(())
        } else {
            Err(WxSenseError::InvalidCoordinate {
                lat: self.0,
                lon: self.1,
            })
        }
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.0, self.1)
    }
}
