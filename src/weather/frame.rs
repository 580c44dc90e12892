//! The hourly weather table shared by both providers, plus its row type.

use crate::types::lat_lon::LatLon;
use crate::types::query_range::QueryRange;
use crate::utils::{f64_values, has_data, naive_datetimes, DATETIME};
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Air temperature in °C.
pub const TEMP: &str = "temp";
/// Average wind speed in km/h.
pub const WSPD: &str = "wspd";
/// Sea-level air pressure in hPa.
pub const PRES: &str = "pres";
/// Sunshine duration in minutes per hour.
pub const TSUN: &str = "tsun";
/// Cloud cover proxy, 0 (clear) to 1 (overcast).
pub const CLOUD_COVER_PROXY: &str = "cloud_cover_proxy";

/// Where hourly weather data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeatherProvider {
    /// Station observations from the Meteostat bulk archive (UTC).
    #[default]
    Meteostat,
    /// Reanalysis data from the Open-Meteo historical weather API.
    OpenMeteo,
}

impl fmt::Display for WeatherProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeatherProvider::Meteostat => write!(f, "meteostat"),
            WeatherProvider::OpenMeteo => write!(f, "open-meteo"),
        }
    }
}

impl FromStr for WeatherProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "meteostat" => Ok(WeatherProvider::Meteostat),
            "open-meteo" | "openmeteo" => Ok(WeatherProvider::OpenMeteo),
            other => Err(format!(
                "unknown weather provider '{}' (expected 'meteostat' or 'open-meteo')",
                other
            )),
        }
    }
}

/// Describes the origin of a [`WeatherFrame`].
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherSource {
    Meteostat {
        station_id: String,
        station_name: String,
        distance_km: f64,
    },
    OpenMeteo {
        location: LatLon,
    },
}

impl fmt::Display for WeatherSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeatherSource::Meteostat {
                station_id,
                station_name,
                distance_km,
            } => write!(
                f,
                "Meteostat station {} ({}), {:.1} km away",
                station_name, station_id, distance_km
            ),
            WeatherSource::OpenMeteo { location } => write!(f, "Open-Meteo grid at {}", location),
        }
    }
}

/// One hour of weather, as held in a [`WeatherFrame`].
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRecord {
    pub datetime: NaiveDateTime,
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub pressure: Option<f64>,
    pub sunshine_minutes: Option<f64>,
    pub cloud_cover_proxy: Option<f64>,
}

/// Hourly weather for one location and query range.
///
/// The frame always carries `datetime` (millisecond UTC timestamps) and the
/// canonical measurement columns [`TEMP`], [`WSPD`], [`PRES`], [`TSUN`] and
/// [`CLOUD_COVER_PROXY`]. Provider specific columns are kept next to them.
#[derive(Debug, Clone)]
pub struct WeatherFrame {
    pub frame: DataFrame,
    pub source: WeatherSource,
    pub range: QueryRange,
}

impl WeatherFrame {
    pub fn new(frame: DataFrame, source: WeatherSource, range: QueryRange) -> Self {
        Self {
            frame,
            source,
            range,
        }
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// True when `column` exists and has at least one value.
    pub fn has_data(&self, column: &str) -> bool {
        has_data(&self.frame, column)
    }

    /// Collects the canonical columns into [`WeatherRecord`]s. Rows without a
    /// timestamp are skipped.
    pub fn records(&self) -> PolarsResult<Vec<WeatherRecord>> {
        let datetimes = naive_datetimes(&self.frame, DATETIME)?;
        let column = |name: &str| -> PolarsResult<Vec<Option<f64>>> {
            if self.frame.column(name).is_ok() {
                f64_values(&self.frame, name)
            } else {
                Ok(vec![None; self.frame.height()])
            }
        };
        let temp = column(TEMP)?;
        let wspd = column(WSPD)?;
        let pres = column(PRES)?;
        let tsun = column(TSUN)?;
        let cloud = column(CLOUD_COVER_PROXY)?;

        Ok(datetimes
            .into_iter()
            .enumerate()
            .filter_map(|(i, dt)| {
                dt.map(|datetime| WeatherRecord {
                    datetime,
                    temperature: temp[i],
                    wind_speed: wspd[i],
                    pressure: pres[i],
                    sunshine_minutes: tsun[i],
                    cloud_cover_proxy: cloud[i],
                })
            })
            .collect())
    }

    /// Min/mean/max style figures for a quick textual overview.
    pub fn summary(&self) -> PolarsResult<WeatherSummary> {
        let records = self.records()?;
        Ok(WeatherSummary {
            hours: records.len(),
            first: records.first().map(|r| r.datetime),
            last: records.last().map(|r| r.datetime),
            temperature_min: fold_min(records.iter().map(|r| r.temperature)),
            temperature_max: fold_max(records.iter().map(|r| r.temperature)),
            mean_wind_speed: mean(records.iter().map(|r| r.wind_speed)),
            mean_pressure: mean(records.iter().map(|r| r.pressure)),
            mean_cloud_cover_proxy: mean(records.iter().map(|r| r.cloud_cover_proxy)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSummary {
    pub hours: usize,
    pub first: Option<NaiveDateTime>,
    pub last: Option<NaiveDateTime>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub mean_wind_speed: Option<f64>,
    pub mean_pressure: Option<f64>,
    pub mean_cloud_cover_proxy: Option<f64>,
}

impl fmt::Display for WeatherSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = |v: Option<f64>, unit: &str| {
            v.map(|v| format!("{:.1} {}", v, unit))
                .unwrap_or_else(|| "n/a".to_string())
        };
        writeln!(f, "hours:            {}", self.hours)?;
        if let (Some(first), Some(last)) = (self.first, self.last) {
            writeln!(f, "period:           {} .. {} UTC", first, last)?;
        }
        writeln!(
            f,
            "temperature:      {} .. {}",
            value(self.temperature_min, "°C"),
            value(self.temperature_max, "°C")
        )?;
        writeln!(f, "mean wind speed:  {}", value(self.mean_wind_speed, "km/h"))?;
        writeln!(f, "mean pressure:    {}", value(self.mean_pressure, "hPa"))?;
        write!(
            f,
            "mean cloud proxy: {}",
            self.mean_cloud_cover_proxy
                .map(|v| format!("{:.2}", v))
                .unwrap_or_else(|| "n/a".to_string())
        )
    }
}

fn fold_min(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
}

fn fold_max(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::datetime_column;
    use chrono::NaiveDate;

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 31)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn sample_frame() -> WeatherFrame {
        let mut df = df!(
            TEMP => [Some(4.5), Some(6.0), None],
            WSPD => [Some(7.2), None, Some(10.8)],
            PRES => [Some(1021.3), Some(1020.9), Some(1020.1)],
            TSUN => [Some(0.0), Some(30.0), None],
            CLOUD_COVER_PROXY => [Some(1.0), Some(0.5), None],
        )
        .unwrap();
        df.insert_column(0, datetime_column(DATETIME, [Some(hour(0)), Some(hour(1)), Some(hour(2))]).unwrap())
            .unwrap();
        let range = QueryRange::single_day(hour(0).date());
        WeatherFrame::new(
            df,
            WeatherSource::OpenMeteo {
                location: LatLon(50.9808, 11.3290),
            },
            range,
        )
    }

    #[test]
    fn test_records_follow_frame_rows() {
        let frame = sample_frame();
        let records = frame.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].datetime, hour(1));
        assert_eq!(records[1].cloud_cover_proxy, Some(0.5));
        assert_eq!(records[2].temperature, None);
    }

    #[test]
    fn test_summary_ignores_missing_values() {
        let summary = sample_frame().summary().unwrap();
        assert_eq!(summary.hours, 3);
        assert_eq!(summary.temperature_min, Some(4.5));
        assert_eq!(summary.temperature_max, Some(6.0));
        assert_eq!(summary.mean_wind_speed, Some(9.0));
        assert_eq!(summary.mean_cloud_cover_proxy, Some(0.75));
        assert!(summary.to_string().contains("hours:            3"));
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("open-meteo".parse::<WeatherProvider>(), Ok(WeatherProvider::OpenMeteo));
        assert_eq!("Meteostat".parse::<WeatherProvider>(), Ok(WeatherProvider::Meteostat));
        assert!("dwd".parse::<WeatherProvider>().is_err());
        assert_eq!(WeatherProvider::OpenMeteo.to_string(), "open-meteo");
    }
}
