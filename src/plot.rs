//! Writes the charts of a render as standalone HTML files.

use crate::error::WxSenseError;
use crate::gradient::{GradientFrame, CLOUD_TOTAL, WIND_DIR, WIND_SPEED};
use crate::merge::{MergedView, SENSOR_MEAN};
use crate::sensor::table::{SensorTable, DATE, ROLLING_MEAN, SENSOR_VALUE};
use crate::utils::{datetime_column, f64_values, has_data, naive_datetimes, DATETIME};
use crate::weather::frame::{WeatherFrame, CLOUD_COVER_PROXY, PRES, TEMP, TSUN, WSPD};
use chrono::NaiveDate;
use log::{debug, info};
use plotlars::{Line, Plot, Rgb, Shape, Text, TimeSeriesPlot};
use polars::prelude::*;
use std::path::{Path, PathBuf};

const TIME_LABEL: &str = "time";
const TIME_LABEL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// The daily sensor charts cover at most this many days.
pub const MAX_DAILY_CHARTS: usize = 4;

const BLUE: (u8, u8, u8) = (0, 0, 255);
const ORANGE: (u8, u8, u8) = (255, 165, 0);
const GREEN: (u8, u8, u8) = (0, 128, 0);
const PURPLE: (u8, u8, u8) = (128, 0, 128);
const RED: (u8, u8, u8) = (255, 0, 0);
const GREY: (u8, u8, u8) = (128, 128, 128);
const DEEP_SKY_BLUE: (u8, u8, u8) = (0, 191, 255);
const BLACK: (u8, u8, u8) = (0, 0, 0);

/// One line of a chart: which column to draw and how to label it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub column: String,
    pub label: String,
    pub color: (u8, u8, u8),
    pub dashed: bool,
}

impl ChartSeries {
    fn solid(column: &str, label: &str, color: (u8, u8, u8)) -> Self {
        Self {
            column: column.to_string(),
            label: label.to_string(),
            color,
            dashed: false,
        }
    }

    fn dashed(column: &str, label: &str, color: (u8, u8, u8)) -> Self {
        Self {
            dashed: true,
            ..Self::solid(column, label, color)
        }
    }
}

/// A chart to be written to `file_name` inside the output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub file_name: String,
    pub title: String,
    pub x_title: String,
    pub y_title: String,
    pub series: Vec<ChartSeries>,
    pub markers: bool,
}

impl ChartSpec {
    fn new(file_name: &str, title: &str, y_title: &str, series: Vec<ChartSeries>) -> Self {
        Self {
            file_name: file_name.to_string(),
            title: title.to_string(),
            x_title: "Time".to_string(),
            y_title: y_title.to_string(),
            series,
            markers: false,
        }
    }
}

/// One chart per weather parameter that is present and has at least one value.
pub fn weather_chart_specs(weather: &WeatherFrame) -> Vec<ChartSpec> {
    let candidates = [
        (CLOUD_COVER_PROXY, "cloud_cover_proxy.html", "Hourly Cloud Cover Proxy", "Cloud Cover Proxy", BLUE),
        (TEMP, "temperature.html", "Hourly Temperature", "Temperature (°C)", ORANGE),
        (WSPD, "wind_speed.html", "Hourly Wind Speed", "Wind Speed (km/h)", GREEN),
        (PRES, "pressure.html", "Hourly Pressure", "Pressure (hPa)", PURPLE),
        (TSUN, "sunshine.html", "Hourly Sunshine Duration", "Sunshine Duration (minutes)", RED),
    ];
    candidates
        .into_iter()
        .filter(|(column, ..)| weather.has_data(column))
        .map(|(column, file_name, title, label, color)| {
            ChartSpec::new(file_name, title, label, vec![ChartSeries::solid(column, label, color)])
        })
        .collect()
}

/// Renders [`ChartSpec`]s into an output directory. All writes block; async
/// callers go through `spawn_blocking`.
pub struct ChartWriter {
    out_dir: PathBuf,
}

impl ChartWriter {
    pub fn new(out_dir: &Path) -> Result<Self, WxSenseError> {
        std::fs::create_dir_all(out_dir).map_err(|e| WxSenseError::Io(out_dir.to_path_buf(), e))?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn weather_charts(&self, weather: &WeatherFrame) -> Result<Vec<PathBuf>, WxSenseError> {
        let title_suffix = format!(" ({})", weather.source);
        weather_chart_specs(weather)
            .into_iter()
            .map(|mut spec| {
                spec.title.push_str(&title_suffix);
                self.render(&weather.frame, &spec)
            })
            .collect()
    }

    /// The full series with its rolling mean, then one chart per day for the
    /// first [`MAX_DAILY_CHARTS`] days with the downsampled readings.
    pub fn sensor_charts(
        &self,
        sensor: &SensorTable,
        rolling_window: usize,
        downsample_step: usize,
    ) -> Result<Vec<PathBuf>, WxSenseError> {
        let label = sensor.value_label().to_string();
        let rolling_label = format!("{}-Point Rolling Mean", rolling_window);
        let downsampled_label = format!("Downsampled {}", label);
        let frame = sensor_frame(sensor, rolling_window, downsample_step)?;

        let mut written = vec![self.render(
            &frame,
            &ChartSpec::new(
                "sensor_full.html",
                &format!("{} Over Entire Time Period", label),
                &label,
                vec![
                    ChartSeries::solid(SENSOR_VALUE, &label, ORANGE),
                    ChartSeries::solid(ROLLING_MEAN, &rolling_label, BLUE),
                ],
            ),
        )?];

        for day in daily_chart_dates(sensor) {
            let daily = frame
                .clone()
                .lazy()
                .filter(col(DATE).eq(lit(day)))
                .collect()?;
            let mut spec = ChartSpec::new(
                &format!("sensor_{}.html", day.format("%Y-%m-%d")),
                &format!("{} on {}", label, day),
                &label,
                vec![
                    ChartSeries::solid(DOWNSAMPLED, &downsampled_label, ORANGE),
                    ChartSeries::solid(ROLLING_MEAN, &rolling_label, BLUE),
                ],
            );
            spec.markers = true;
            written.push(self.render(&daily, &spec)?);
        }
        Ok(written)
    }

    /// Hourly sensor mean against the cloud proxy and temperature, each scaled
    /// to 0..1. `None` when no weather hour has sensor readings.
    pub fn comparison_chart(&self, merged: &MergedView) -> Result<Option<PathBuf>, WxSenseError> {
        if merged.matched_hours() == 0 {
            debug!("No overlapping hours, skipping comparison chart");
            return Ok(None);
        }
        let mut columns = vec![datetime_column(DATETIME, naive_datetimes(&merged.frame, DATETIME)?)?];
        let mut series = Vec::new();
        for (column, label, color) in [
            (SENSOR_MEAN, format!("{} (hourly mean)", merged.value_label), ORANGE),
            (CLOUD_COVER_PROXY, "Cloud Cover Proxy".to_string(), BLUE),
            (TEMP, "Temperature".to_string(), RED),
        ] {
            if !has_data(&merged.frame, column) {
                continue;
            }
            let scaled = min_max_scale(&f64_values(&merged.frame, column)?);
            columns.push(Column::new(column.into(), scaled));
            series.push(ChartSeries::solid(column, &label, color));
        }
        let frame = DataFrame::new(columns)?;
        let spec = ChartSpec::new(
            "comparison.html",
            &format!("{} vs. weather (scaled 0..1)", merged.value_label),
            "Scaled value",
            series,
        );
        self.render(&frame, &spec).map(Some)
    }

    /// Pressure differences with the threshold line, and wind at the reference site.
    pub fn gradient_charts(&self, gradient: &GradientFrame) -> Result<Vec<PathBuf>, WxSenseError> {
        let settings = &gradient.settings;
        let colors = [GREY, DEEP_SKY_BLUE, PURPLE, GREEN];
        let mut series: Vec<ChartSeries> = settings
            .pairs
            .iter()
            .zip(gradient.delta_columns())
            .enumerate()
            .map(|(i, ((a, b), column))| {
                let label = format!("ΔP {}–{}", a.replace('_', " "), b.replace('_', " "));
                ChartSeries::solid(&column, &label, colors[i % colors.len()])
            })
            .collect();
        series.push(ChartSeries::solid(CLOUD_TOTAL, "clouds total [Okta/2]", BLACK));
        series.push(ChartSeries::dashed(THRESHOLD, &settings.threshold_label, RED));

        let frame = gradient
            .frame
            .clone()
            .lazy()
            .with_column(lit(settings.threshold_hpa).alias(THRESHOLD))
            .collect()?;
        let mut pressure = ChartSpec::new(
            "pressure_gradient.html",
            "Druckgradienten & Bewölkung",
            "δP [hPa]; clouds [Okta/2]",
            series,
        );
        pressure.x_title = "Datum & Stunde".to_string();

        let reference = settings.reference_site.replace('_', " ");
        let wind_speed = ChartSpec::new(
            "wind_speed_reference.html",
            &format!("Windstärke {}", reference),
            "Wind speed (km/h)",
            vec![ChartSeries::solid(WIND_SPEED, "wind_speed", GREEN)],
        );
        let wind_dir = ChartSpec::new(
            "wind_direction_reference.html",
            &format!("Windrichtung {}", reference),
            "Richtung [°]",
            vec![ChartSeries::solid(WIND_DIR, "wind_dir", BLUE)],
        );

        [pressure, wind_speed, wind_dir]
            .iter()
            .map(|spec| self.render(&frame, spec))
            .collect()
    }

    /// Writes one chart. The x axis shows `datetime` as text.
    pub fn render(&self, df: &DataFrame, spec: &ChartSpec) -> Result<PathBuf, WxSenseError> {
        let path = self.out_dir.join(&spec.file_name);
        let mut exprs = vec![col(DATETIME).dt().to_string(TIME_LABEL_FORMAT).alias(TIME_LABEL)];
        exprs.extend(
            spec.series
                .iter()
                .map(|s| col(s.column.as_str()).cast(DataType::Float64).alias(s.label.as_str())),
        );
        let data = df.clone().lazy().select(exprs).collect()?;

        let labels: Vec<&str> = spec.series.iter().map(|s| s.label.as_str()).collect();
        let Some((first, rest)) = labels.split_first() else {
            return Err(WxSenseError::EmptyChart(spec.file_name.clone()));
        };
        let colors: Vec<Rgb> = spec
            .series
            .iter()
            .map(|s| Rgb(s.color.0, s.color.1, s.color.2))
            .collect();
        let lines: Vec<Line> = spec
            .series
            .iter()
            .map(|s| if s.dashed { Line::Dash } else { Line::Solid })
            .collect();

        TimeSeriesPlot::builder()
            .data(&data)
            .x(TIME_LABEL)
            .y(*first)
            .maybe_additional_series((!rest.is_empty()).then(|| rest.to_vec()))
            .colors(colors)
            .lines(lines)
            .with_shape(spec.markers)
            .shapes(labels.iter().map(|_| Shape::Circle).collect())
            .size(5)
            .plot_title(Text::from(spec.title.as_str()).size(18))
            .x_title(spec.x_title.as_str())
            .y_title(spec.y_title.as_str())
            .build()
            .write_html(path.to_string_lossy().to_string());

        info!("Wrote chart '{}' to {}", spec.title, path.display());
        Ok(path)
    }
}

const DOWNSAMPLED: &str = "downsampled";
const THRESHOLD: &str = "threshold";

/// Sensor readings with the rolling mean over all rows, plus a `downsampled`
/// column holding every `step`-th reading (null elsewhere).
fn sensor_frame(sensor: &SensorTable, rolling_window: usize, step: usize) -> PolarsResult<DataFrame> {
    let step = step.max(1);
    let mut frame = sensor.with_rolling_mean(rolling_window)?;
    let downsampled: Vec<Option<f64>> = sensor
        .records()
        .iter()
        .enumerate()
        .map(|(i, r)| (i % step == 0).then_some(r.value))
        .collect();
    frame.with_column(Column::new(DOWNSAMPLED.into(), downsampled))?;
    Ok(frame)
}

fn min_max_scale(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present = values.iter().flatten();
    let min = present.clone().copied().fold(f64::INFINITY, f64::min);
    let max = present.copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    values
        .iter()
        .map(|v| v.and_then(|v| (span > 0.0).then(|| (v - min) / span)))
        .collect()
}

/// Dates that get their own sensor chart.
pub fn daily_chart_dates(sensor: &SensorTable) -> Vec<NaiveDate> {
    sensor
        .unique_dates()
        .into_iter()
        .take(MAX_DAILY_CHARTS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::table::SensorRecord;
    use crate::types::lat_lon::LatLon;
    use crate::types::query_range::QueryRange;
    use crate::weather::frame::WeatherSource;
    use chrono::{NaiveDateTime, TimeDelta};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn weather(tsun: [Option<f64>; 3]) -> WeatherFrame {
        let mut df = df!(
            TEMP => [Some(4.0), Some(5.0), Some(6.0)],
            WSPD => [None::<f64>, None, None],
            PRES => [Some(1020.0), Some(1019.0), Some(1018.0)],
            TSUN => tsun,
        )
        .unwrap();
        df.insert_column(
            0,
            datetime_column(DATETIME, (0..3).map(|h| Some(start() + TimeDelta::hours(h)))).unwrap(),
        )
        .unwrap();
        let df = df
            .lazy()
            .with_column((lit(1.0) - col(TSUN) / lit(60.0)).alias(CLOUD_COVER_PROXY))
            .collect()
            .unwrap();
        WeatherFrame::new(
            df,
            WeatherSource::OpenMeteo {
                location: LatLon(50.9808, 11.3290),
            },
            QueryRange::single_day(start().date()),
        )
    }

    fn sensor(days: i64) -> SensorTable {
        let records = (0..days * 24)
            .map(|i| SensorRecord {
                datetime: start() + TimeDelta::hours(i),
                value: -80.0 - i as f64,
            })
            .collect();
        SensorTable::new(records, "IR20-E-korrigiert".to_string(), 0)
    }

    #[test]
    fn test_weather_charts_skip_missing_parameters() {
        let specs = weather_chart_specs(&weather([Some(0.0), Some(30.0), None]));
        let files: Vec<&str> = specs.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(
            files,
            vec!["cloud_cover_proxy.html", "temperature.html", "pressure.html", "sunshine.html"]
        );

        let specs = weather_chart_specs(&weather([None, None, None]));
        assert!(specs.iter().all(|s| s.file_name != "sunshine.html"));
        assert!(specs.iter().all(|s| s.file_name != "cloud_cover_proxy.html"));
    }

    #[test]
    fn test_daily_charts_limited_to_four_days() {
        let dates = daily_chart_dates(&sensor(6));
        assert_eq!(dates.len(), MAX_DAILY_CHARTS);
        assert_eq!(dates[0], start().date());
    }

    #[test]
    fn test_sensor_frame_marks_downsampled_rows() {
        let frame = sensor_frame(&sensor(1), 3, 10).unwrap();
        let downsampled = f64_values(&frame, DOWNSAMPLED).unwrap();
        assert_eq!(downsampled[0], Some(-80.0));
        assert_eq!(downsampled[1], None);
        assert_eq!(downsampled[10], Some(-90.0));
        let rolling = f64_values(&frame, ROLLING_MEAN).unwrap();
        assert_eq!(rolling[1], None);
        assert_eq!(rolling[2], Some(-81.0));
    }

    #[test]
    fn test_min_max_scale() {
        assert_eq!(
            min_max_scale(&[Some(2.0), None, Some(4.0), Some(3.0)]),
            vec![Some(0.0), None, Some(1.0), Some(0.5)]
        );
        assert_eq!(min_max_scale(&[Some(1.0), Some(1.0)]), vec![None, None]);
    }

    #[test]
    fn test_writes_weather_html() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ChartWriter::new(&dir.path().join("charts")).unwrap();
        let written = writer
            .weather_charts(&weather([Some(0.0), Some(30.0), Some(60.0)]))
            .unwrap();
        assert_eq!(written.len(), 4);
        for path in written {
            let html = std::fs::read_to_string(&path).unwrap();
            assert!(html.contains("Hourly"));
        }
    }
}
