//! Defines the data structures representing Meteostat weather stations and their metadata.
//! Also includes implementations necessary for spatial indexing using the `rstar` crate.

use chrono::NaiveDate;
use rstar::{PointDistance, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single Meteostat weather station, as listed in the bulk station metadata.
///
/// Only the fields needed to find a station and describe it are kept; the
/// remaining fields of the Meteostat JSON are ignored while deserializing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    /// The unique Meteostat station identifier (e.g., "10554").
    pub id: String,
    /// The country code where the station is located (e.g., "DE", "AT").
    pub country: String,
    /// The IANA timezone name for the station's location, if available.
    pub timezone: Option<String>,
    /// Station names keyed by language code (e.g., {"en": "Erfurt-Weimar"}).
    pub name: HashMap<String, String>,
    pub location: Location,
    pub inventory: Inventory,
}

impl Station {
    /// The English station name, falling back to any name, then to the id.
    pub fn display_name(&self) -> &str {
        self.name
            .get("en")
            .or_else(|| self.name.values().next())
            .map(String::as_str)
            .unwrap_or(&self.id)
    }
}

/// Data availability reported by Meteostat. Only hourly coverage matters here.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Inventory {
    pub hourly: DateRange,
}

/// A date range with optional start and end dates.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// True when both bounds are known and enclose `[start, end]`.
    pub fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        match (self.start, self.end) {
            (Some(inv_start), Some(inv_end)) => inv_start <= start && inv_end >= end,
            _ => false,
        }
    }
}

/// The geographical location of a weather station.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Location {
    /// Latitude in decimal degrees (positive for North, negative for South).
    pub latitude: f64,
    /// Longitude in decimal degrees (positive for East, negative for West).
    pub longitude: f64,
    /// Elevation above sea level in meters, if available.
    pub elevation: Option<i32>,
}

/// A station is a degenerate AABB at its (latitude, longitude).
impl RTreeObject for Station {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.location.latitude, self.location.longitude])
    }
}

/// Squared Euclidean distance in degree space. Only used to order R-tree
/// candidates; real distances are computed with haversine afterwards.
impl PointDistance for Station {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.location.latitude - point[0];
        let dy = self.location.longitude - point[1];
        dx * dx + dy * dy
    }
}
