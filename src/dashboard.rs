//! One render cycle: weather, optional sensor upload, alignment, charts and exports.

use crate::config::Config;
use crate::error::WxSenseError;
use crate::export::export_csv;
use crate::gradient::{self, GradientFrame};
use crate::merge::{merge, MergedView};
use crate::plot::ChartWriter;
use crate::sensor::{parse_sensor_file, SensorOptions, SensorTable};
use crate::types::lat_lon::LatLon;
use crate::types::query_range::{DateSelection, QueryRange};
use crate::weather::client::WeatherClient;
use crate::weather::frame::{
    WeatherFrame, WeatherProvider, WeatherSource, WeatherSummary, CLOUD_COVER_PROXY, TEMP,
};
use bon::{bon, Builder};
use chrono::{NaiveDate, NaiveDateTime};
use log::{info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFINITIONS: &str = "\
Cloud Cover Proxy      Derived cloud cover, 1 = overcast, 0 = clear. Meteostat: 1 - sunshine minutes / 60; Open-Meteo: cloud cover / 100.
Temperature (°C)       Air temperature at 2 m for the hour.
Wind Speed (km/h)      Mean wind speed over the hour.
Pressure (hPa)         Atmospheric pressure reduced to sea level.
Sunshine Duration (min) Minutes of sunshine within the hour.
IR20-E-korrigiert      Corrected longwave (infrared) radiation logged by the IR20 sensor.";

/// Short explanations of every charted parameter.
pub fn parameter_definitions() -> &'static str {
    DEFINITIONS
}

/// A sensor log to include in a render.
#[derive(Debug, Clone)]
pub enum SensorInput {
    Path(PathBuf),
    /// An already uploaded file.
    Bytes { name: String, bytes: Vec<u8> },
}

impl SensorInput {
    fn name(&self) -> String {
        match self {
            SensorInput::Path(path) => path.display().to_string(),
            SensorInput::Bytes { name, .. } => name.clone(),
        }
    }
}

#[derive(Debug, Clone, Builder)]
pub struct RenderRequest {
    pub location: LatLon,
    pub dates: DateSelection,
    #[builder(default)]
    pub provider: WeatherProvider,
    pub sensor: Option<SensorInput>,
    #[builder(into)]
    pub out_dir: PathBuf,
    /// Also write the weather, sensor and merged tables as CSV.
    #[builder(default)]
    pub export: bool,
}

#[derive(Debug, Clone)]
pub struct SensorReport {
    pub value_label: String,
    pub rows: usize,
    pub dropped_rows: usize,
    pub span: Option<(NaiveDateTime, NaiveDateTime)>,
    pub matched_hours: usize,
    pub correlation_cloud_cover: Option<f64>,
    pub correlation_temperature: Option<f64>,
}

/// What a render produced.
#[derive(Debug, Clone)]
pub struct RenderReport {
    pub range: QueryRange,
    pub source: WeatherSource,
    pub weather: WeatherSummary,
    pub sensor: Option<SensorReport>,
    pub charts: Vec<PathBuf>,
    pub exports: Vec<PathBuf>,
}

impl fmt::Display for RenderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "range:            {}", self.range)?;
        writeln!(f, "source:           {}", self.source)?;
        writeln!(f, "{}", self.weather)?;
        if let Some(sensor) = &self.sensor {
            writeln!(f, "sensor rows:      {} ({} dropped)", sensor.rows, sensor.dropped_rows)?;
            if let Some((first, last)) = sensor.span {
                writeln!(f, "sensor period:    {} .. {}", first, last)?;
            }
            writeln!(f, "matched hours:    {}", sensor.matched_hours)?;
            let r = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{:.3}", v));
            writeln!(f, "r(sensor, cloud): {}", r(sensor.correlation_cloud_cover))?;
            writeln!(f, "r(sensor, temp):  {}", r(sensor.correlation_temperature))?;
        }
        for path in self.charts.iter().chain(&self.exports) {
            writeln!(f, "wrote {}", path.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GradientReport {
    pub gradient: GradientFrame,
    pub hours_above_threshold: usize,
    pub charts: Vec<PathBuf>,
    pub exports: Vec<PathBuf>,
}

pub struct Dashboard {
    config: Config,
    weather: WeatherClient,
}

#[bon]
impl Dashboard {
    /// Builds the weather client from the `[weather]` section of `config`.
    pub async fn new(config: Config) -> Result<Self, WxSenseError> {
        let settings = &config.weather;
        let weather = WeatherClient::builder()
            .maybe_cache_dir(settings.cache_dir.clone())
            .meteostat_url(settings.meteostat_url.clone())
            .open_meteo_url(settings.open_meteo_url.clone())
            .timezone(settings.timezone.clone())
            .maybe_request_timeout(settings.request_timeout_secs.map(Duration::from_secs))
            .build()
            .await?;
        Ok(Self::with_client(config, weather))
    }

    pub fn with_client(config: Config, weather: WeatherClient) -> Self {
        Self { config, weather }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn weather_client(&self) -> &WeatherClient {
        &self.weather
    }

    /// Resolves a place name through `[places]` first, then through the
    /// Meteostat station names.
    pub async fn resolve_place(&self, name: &str) -> Result<LatLon, WxSenseError> {
        if let Some(location) = self.config.resolve_place(name) {
            return Ok(location);
        }
        let locator = self.weather.station_locator().await?;
        match locator.find_by_name(name) {
            Some(station) => {
                info!("Resolved '{}' to station {} ({})", name, station.display_name(), station.id);
                Ok(LatLon(station.location.latitude, station.location.longitude))
            }
            None => Err(WxSenseError::UnknownPlace(name.to_string())),
        }
    }

    /// Parses the sensor file when given, fetches weather, aligns both and
    /// writes the charts (and CSV tables when asked) to `request.out_dir`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid date range or coordinate, when no weather can be
    /// fetched, when the sensor file has no valid rows, or on write errors.
    pub async fn render(&self, request: &RenderRequest) -> Result<RenderReport, WxSenseError> {
        let range = request.dates.query_range()?;
        request.location.validate()?;
        let settings = &self.config.weather;

        // An unusable upload fails the render before anything is fetched or written.
        let table = match &request.sensor {
            Some(input) => Some(self.load_sensor(input).await?),
            None => None,
        };

        let weather = self
            .weather
            .hourly()
            .location(request.location)
            .range(range)
            .provider(request.provider)
            .max_distance_km(settings.max_distance_km)
            .station_limit(settings.station_limit)
            .call()
            .await?;
        info!("Fetched {} weather hours from {}", weather.height(), weather.source);
        if weather.is_empty() {
            warn!("No weather rows between {}", range);
        }
        let summary = weather.summary()?;
        let source = weather.source.clone();

        let options = self.config.sensor.clone();
        let out_dir = request.out_dir.clone();
        let export = request.export;
        let written = tokio::task::spawn_blocking(move || {
            write_render(&out_dir, export, &weather, table.as_ref(), &options)
        })
        .await??;

        Ok(RenderReport {
            range,
            source,
            weather: summary,
            sensor: written.sensor,
            charts: written.charts,
            exports: written.exports,
        })
    }

    /// Pressure differences between the `[gradient]` sites for the whole days
    /// `start..=end`, charted into `out_dir`.
    #[builder]
    pub async fn gradient(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        #[builder(into)] out_dir: PathBuf,
        #[builder(default)] export: bool,
    ) -> Result<GradientReport, WxSenseError> {
        let gradient = gradient::compute(
            self.weather.open_meteo(),
            start,
            end,
            &self.config.gradient,
        )
        .await?;
        let hours_above_threshold = gradient.hours_above_threshold()?;
        tokio::task::spawn_blocking(move || -> Result<GradientReport, WxSenseError> {
            let writer = ChartWriter::new(&out_dir)?;
            let charts = writer.gradient_charts(&gradient)?;
            let mut exports = Vec::new();
            if export {
                let path = out_dir.join("gradient.csv");
                export_csv(&gradient.frame, &path)?;
                exports.push(path);
            }
            Ok(GradientReport {
                gradient,
                hours_above_threshold,
                charts,
                exports,
            })
        })
        .await?
    }

    async fn load_sensor(&self, input: &SensorInput) -> Result<SensorTable, WxSenseError> {
        let bytes = match input {
            SensorInput::Path(path) => read_bytes(path).await?,
            SensorInput::Bytes { bytes, .. } => bytes.clone(),
        };
        let options = self.config.sensor.clone();
        let table = tokio::task::spawn_blocking(move || parse_sensor_file(&bytes, &options)).await??;
        info!(
            "Parsed {} sensor rows from {} ({} dropped)",
            table.len(),
            input.name(),
            table.dropped_rows()
        );
        Ok(table)
    }
}

/// Files written by one render.
struct Written {
    charts: Vec<PathBuf>,
    exports: Vec<PathBuf>,
    sensor: Option<SensorReport>,
}

/// Merges, charts and exports a render. Blocking: runs on the blocking pool.
fn write_render(
    out_dir: &Path,
    export: bool,
    weather: &WeatherFrame,
    table: Option<&SensorTable>,
    options: &SensorOptions,
) -> Result<Written, WxSenseError> {
    let writer = ChartWriter::new(out_dir)?;
    let mut charts = writer.weather_charts(weather)?;
    let mut exports = Vec::new();
    if export {
        let path = out_dir.join("weather.csv");
        export_csv(&weather.frame, &path)?;
        exports.push(path);
    }

    let Some(table) = table else {
        return Ok(Written {
            charts,
            exports,
            sensor: None,
        });
    };
    charts.extend(writer.sensor_charts(table, options.rolling_window, options.downsample_step)?);
    let merged = merge(weather, table)?;
    if let Some(path) = writer.comparison_chart(&merged)? {
        charts.push(path);
    }
    if export {
        let sensor_path = out_dir.join("sensor.csv");
        export_csv(&table.with_rolling_mean(options.rolling_window)?, &sensor_path)?;
        let merged_path = out_dir.join("merged.csv");
        export_csv(&merged.frame, &merged_path)?;
        exports.extend([sensor_path, merged_path]);
    }

    let sensor = SensorReport {
        value_label: table.value_label().to_string(),
        rows: table.len(),
        dropped_rows: table.dropped_rows(),
        span: table.span(),
        matched_hours: merged.matched_hours(),
        correlation_cloud_cover: optional_correlation(&merged, CLOUD_COVER_PROXY)?,
        correlation_temperature: optional_correlation(&merged, TEMP)?,
    };
    Ok(Written {
        charts,
        exports,
        sensor: Some(sensor),
    })
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, WxSenseError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| WxSenseError::Io(path.to_path_buf(), e))
}

fn optional_correlation(merged: &MergedView, column: &str) -> Result<Option<f64>, WxSenseError> {
    if merged.frame.column(column).is_err() {
        return Ok(None);
    }
    Ok(merged.correlation(column)?)
}
