//! TOML configuration. Every field has a default, so an empty or missing file
//! yields the built-in setup.

use crate::gradient::GradientSettings;
use crate::sensor::options::SensorOptions;
use crate::types::lat_lon::LatLon;
use crate::types::query_range::QueryRange;
use crate::weather::client::{
    DEFAULT_MAX_DISTANCE_KM, DEFAULT_METEOSTAT_URL, DEFAULT_STATION_LIMIT, DEFAULT_TIMEZONE,
};
use crate::weather::frame::WeatherProvider;
use crate::weather::open_meteo::DEFAULT_ARCHIVE_URL;
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_DIR_NAME: &str = "wxsense";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Malformed config file '{0}'")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub dates: DatesConfig,
    pub sensor: SensorOptions,
    pub weather: WeatherConfig,
    /// Named coordinates usable wherever a location is asked for.
    pub places: PlacesConfig,
    pub gradient: GradientSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 50.9808,
            longitude: 11.3290,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatesConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Default for DatesConfig {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2024, 10, 31).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2024, 11, 3).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub provider: WeatherProvider,
    /// Download cache; the user cache directory when unset.
    pub cache_dir: Option<PathBuf>,
    pub max_distance_km: f64,
    pub station_limit: usize,
    pub meteostat_url: String,
    pub open_meteo_url: String,
    /// Zone of the Open-Meteo timestamps used for the weather charts.
    pub timezone: String,
    pub request_timeout_secs: Option<u64>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            provider: WeatherProvider::default(),
            cache_dir: None,
            max_distance_km: DEFAULT_MAX_DISTANCE_KM,
            station_limit: DEFAULT_STATION_LIMIT,
            meteostat_url: DEFAULT_METEOSTAT_URL.to_string(),
            open_meteo_url: DEFAULT_ARCHIVE_URL.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            request_timeout_secs: Some(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlacesConfig(pub BTreeMap<String, LatLon>);

impl Default for PlacesConfig {
    fn default() -> Self {
        let place = |name: &str, lat: f64, lon: f64| (name.to_string(), LatLon(lat, lon));
        Self(BTreeMap::from([
            place("Weimar", 50.9808, 11.3290),
            place("Traunkirchen", 47.993, 13.745),
            place("Gmunden", 47.918, 13.799),
            place("Bad_Ischl", 47.714, 13.632),
            place("Ried", 48.198, 13.490),
        ]))
    }
}

impl Config {
    /// `<config dir>/wxsense/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads `path`, or the default path when `None`. A missing default file
    /// gives the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };
        if !explicit && !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
        let config = Self::from_toml(&text).map_err(|e| match e {
            ParseOrInvalid::Parse(e) => ConfigError::Parse(path.clone(), e),
            ParseOrInvalid::Invalid(e) => e,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Self::from_toml(text).map_err(|e| match e {
            ParseOrInvalid::Parse(e) => ConfigError::Parse(PathBuf::from("<inline>"), e),
            ParseOrInvalid::Invalid(e) => e,
        })
    }

    fn from_toml(text: &str) -> Result<Self, ParseOrInvalid> {
        let config: Config = toml::from_str(text).map_err(ParseOrInvalid::Parse)?;
        config.validate().map_err(ParseOrInvalid::Invalid)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        LatLon(self.location.latitude, self.location.longitude)
            .validate()
            .map_err(|e| ConfigError::invalid("location", e.to_string()))?;
        QueryRange::new(self.dates.start, self.dates.end)
            .map_err(|e| ConfigError::invalid("dates", e.to_string()))?;
        if self.sensor.rolling_window == 0 {
            return Err(ConfigError::invalid("sensor.rolling_window", "must be at least 1"));
        }
        if self.sensor.downsample_step == 0 {
            return Err(ConfigError::invalid("sensor.downsample_step", "must be at least 1"));
        }
        if !(self.weather.max_distance_km > 0.0) {
            return Err(ConfigError::invalid("weather.max_distance_km", "must be positive"));
        }
        if self.weather.station_limit == 0 {
            return Err(ConfigError::invalid("weather.station_limit", "must be at least 1"));
        }
        for (name, location) in &self.places.0 {
            location
                .validate()
                .map_err(|e| ConfigError::invalid(&format!("places.{}", name), e.to_string()))?;
        }
        if !self.gradient.sites.contains_key(&self.gradient.reference_site) {
            return Err(ConfigError::invalid(
                "gradient.reference_site",
                format!("'{}' is not one of gradient.sites", self.gradient.reference_site),
            ));
        }
        if let Some((a, b)) = self
            .gradient
            .pairs
            .iter()
            .find(|(a, b)| !self.gradient.sites.contains_key(a) || !self.gradient.sites.contains_key(b))
        {
            return Err(ConfigError::invalid(
                "gradient.pairs",
                format!("pair ({}, {}) names a site without coordinates", a, b),
            ));
        }
        Ok(())
    }

    /// The configured default location.
    pub fn location(&self) -> LatLon {
        LatLon(self.location.latitude, self.location.longitude)
    }

    /// Looks a place up by name, ignoring case and treating `_` like a space.
    pub fn resolve_place(&self, name: &str) -> Option<LatLon> {
        let wanted = normalize_place(name);
        self.places
            .0
            .iter()
            .find(|(key, _)| normalize_place(key) == wanted)
            .map(|(_, location)| *location)
    }
}

enum ParseOrInvalid {
    Parse(toml::de::Error),
    Invalid(ConfigError),
}

fn normalize_place(name: &str) -> String {
    name.trim().replace('_', " ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.location(), LatLon(50.9808, 11.3290));
        assert_eq!(config.sensor.value_column, 16);
        assert_eq!(config.weather.timezone, "GMT");
        assert_eq!(config.gradient.threshold_hpa, 1.5);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::parse(
            r#"
            [location]
            latitude = 47.993
            longitude = 13.745

            [dates]
            start = "2025-01-01"
            end = "2025-01-02"

            [sensor]
            timezone = "Europe/Vienna"

            [weather]
            provider = "open-meteo"
            max_distance_km = 25.0

            [places]
            Feuerkogel = [47.817, 13.717]
            "#,
        )
        .unwrap();
        assert_eq!(config.location(), LatLon(47.993, 13.745));
        assert_eq!(config.dates.start, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(config.sensor.timezone.as_deref(), Some("Europe/Vienna"));
        assert_eq!(config.sensor.skip_rows, 7);
        assert_eq!(config.weather.provider, WeatherProvider::OpenMeteo);
        assert_eq!(config.weather.station_limit, DEFAULT_STATION_LIMIT);
        assert_eq!(config.resolve_place("feuerkogel"), Some(LatLon(47.817, 13.717)));
        assert_eq!(config.resolve_place("Gmunden"), None);
    }

    #[test]
    fn test_resolve_default_places() {
        let config = Config::default();
        assert_eq!(config.resolve_place("bad ischl"), Some(LatLon(47.714, 13.632)));
        assert_eq!(config.resolve_place("Atlantis"), None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Config::parse("[dates]\nstart = \"2024-11-03\"\nend = \"2024-10-31\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "dates"));

        let err = Config::parse("[location]\nlatitude = 95.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "location"));

        let err = Config::parse("[gradient]\nreference_site = \"Altaussee\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = Config::parse("[sensor]\nrolling_window = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        assert!(matches!(Config::parse("[location"), Err(ConfigError::Parse(..))));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Read(..))));

        std::fs::write(&path, "[weather]\nstation_limit = 5\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.weather.station_limit, 5);
    }
}
