use crate::config::ConfigError;
use crate::sensor::error::SensorError;
use crate::stations::error::LocateStationError;
use crate::weather::error::WeatherDataError;
use chrono::NaiveDate;
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WxSenseError {
    #[error(transparent)]
    WeatherData(#[from] WeatherDataError),

    #[error(transparent)]
    LocateStation(#[from] LocateStationError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed processing data table")]
    Polars(#[from] PolarsError),

    #[error("Failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to determine cache directory")]
    CacheDirResolution,

    #[error("Failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),

    #[error("Start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("Unknown place '{0}'")]
    UnknownPlace(String),

    #[error("Gradient site '{0}' has no coordinates")]
    UnknownSite(String),

    #[error("No weather station found within {radius} km of ({lat}, {lon})")]
    NoStationWithinRadius { radius: f64, lat: f64, lon: f64 },

    #[error("No hourly data found for {stations_tried} station(s) within {radius} km of ({lat}, {lon})")]
    NoDataFoundForNearbyStations {
        radius: f64,
        lat: f64,
        lon: f64,
        stations_tried: usize,
        #[source]
        last_error: Option<Box<WxSenseError>>,
    },

    #[error("Failed to export CSV to '{0}'")]
    Export(PathBuf, #[source] PolarsError),

    #[error("Failed to import CSV from '{0}'")]
    Import(PathBuf, #[source] PolarsError),

    #[error("I/O error on '{0}'")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Chart '{0}' has no series to draw")]
    EmptyChart(String),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
