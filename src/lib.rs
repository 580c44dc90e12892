//! Hourly weather for a location, aligned with longwave radiation sensor logs
//! and rendered as comparative charts.

pub mod config;
pub mod dashboard;
mod error;
pub mod export;
pub mod gradient;
pub mod merge;
pub mod plot;
pub mod sensor;
mod stations;
mod types;
mod utils;
pub mod weather;

#[cfg(test)]
mod test_support;

pub use config::{Config, ConfigError};
pub use dashboard::{
    parameter_definitions, Dashboard, GradientReport, RenderReport, RenderRequest, SensorInput,
    SensorReport,
};
pub use error::WxSenseError;
pub use export::{export_csv, import_csv};
pub use gradient::{GradientFrame, GradientSettings};
pub use merge::{merge, MergedView};
pub use plot::ChartWriter;
pub use sensor::{parse_sensor_file, read_sensor_file, SensorError, SensorOptions, SensorRecord, SensorTable};

pub use types::lat_lon::LatLon;
pub use types::query_range::{DateSelection, QueryRange};
pub use types::station::*;

pub use stations::error::LocateStationError;
pub use stations::locate_station::{InventoryFilter, StationLocator};
pub use weather::client::WeatherClient;
pub use weather::error::WeatherDataError;
pub use weather::frame::{WeatherFrame, WeatherProvider, WeatherRecord, WeatherSource, WeatherSummary};
pub use weather::open_meteo::OpenMeteoClient;

pub use utils::DATETIME;
