//! Aligns sensor readings with hourly weather by timestamp.

use crate::sensor::table::SensorTable;
use crate::utils::{datetime_column, f64_values, DATETIME};
use crate::weather::frame::WeatherFrame;
use chrono::{NaiveDateTime, Timelike};
use log::debug;
use polars::prelude::*;
use std::collections::BTreeMap;

/// Mean of the sensor readings within the hour starting at `datetime`.
pub const SENSOR_MEAN: &str = "sensor_mean";
/// Number of sensor readings within the hour.
pub const SENSOR_SAMPLES: &str = "sensor_samples";

/// Hourly weather rows with the matching hourly sensor means attached.
#[derive(Debug, Clone)]
pub struct MergedView {
    pub frame: DataFrame,
    pub value_label: String,
}

impl MergedView {
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Weather hours that received at least one sensor reading.
    pub fn matched_hours(&self) -> usize {
        self.frame
            .column(SENSOR_MEAN)
            .map(|c| c.len() - c.null_count())
            .unwrap_or(0)
    }

    /// Pearson correlation between the hourly sensor mean and `column`, over rows
    /// where both are present. `None` with fewer than two such rows or when either
    /// side is constant.
    pub fn correlation(&self, column: &str) -> PolarsResult<Option<f64>> {
        let sensor = f64_values(&self.frame, SENSOR_MEAN)?;
        let other = f64_values(&self.frame, column)?;
        let pairs: Vec<(f64, f64)> = sensor
            .into_iter()
            .zip(other)
            .filter_map(|(a, b)| a.zip(b))
            .collect();
        Ok(pearson(&pairs))
    }
}

/// Averages sensor readings per hour and left-joins them onto the weather rows.
/// Weather hours without readings keep null sensor columns; readings outside
/// the weather hours are not part of the view.
pub fn merge(weather: &WeatherFrame, sensor: &SensorTable) -> PolarsResult<MergedView> {
    let hourly = hourly_means(sensor)?;
    let frame = weather
        .frame
        .clone()
        .lazy()
        .join(
            hourly.lazy(),
            [col(DATETIME)],
            [col(DATETIME)],
            JoinArgs::new(JoinType::Left),
        )
        .sort([DATETIME], Default::default())
        .collect()?;

    let view = MergedView {
        frame,
        value_label: sensor.value_label().to_string(),
    };
    debug!(
        "Merged {} weather hours with sensor data, {} hours matched",
        view.height(),
        view.matched_hours()
    );
    Ok(view)
}

/// `datetime`, `sensor_mean` and `sensor_samples` per hour that has readings.
pub fn hourly_means(sensor: &SensorTable) -> PolarsResult<DataFrame> {
    let mut buckets: BTreeMap<NaiveDateTime, (f64, u32)> = BTreeMap::new();
    for record in sensor.records() {
        let hour = truncate_to_hour(record.datetime);
        let bucket = buckets.entry(hour).or_insert((0.0, 0));
        bucket.0 += record.value;
        bucket.1 += 1;
    }

    let datetimes = datetime_column(DATETIME, buckets.keys().copied().map(Some))?;
    let means: Vec<f64> = buckets
        .values()
        .map(|(sum, count)| sum / f64::from(*count))
        .collect();
    let counts: Vec<u32> = buckets.values().map(|(_, count)| *count).collect();
    DataFrame::new(vec![
        datetimes,
        Column::new(SENSOR_MEAN.into(), means),
        Column::new(SENSOR_SAMPLES.into(), counts),
    ])
}

fn truncate_to_hour(datetime: NaiveDateTime) -> NaiveDateTime {
    datetime
        .date()
        .and_hms_opt(datetime.hour(), 0, 0)
        .unwrap_or(datetime)
}

fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::table::SensorRecord;
    use crate::types::lat_lon::LatLon;
    use crate::types::query_range::QueryRange;
    use crate::weather::frame::{WeatherSource, CLOUD_COVER_PROXY, TEMP};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 31)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn weather(hours: &[u32], temps: &[f64], cloud: &[Option<f64>]) -> WeatherFrame {
        let mut df = df!(
            TEMP => temps,
            CLOUD_COVER_PROXY => cloud,
        )
        .unwrap();
        df.insert_column(0, datetime_column(DATETIME, hours.iter().map(|h| Some(at(*h, 0)))).unwrap())
            .unwrap();
        WeatherFrame::new(
            df,
            WeatherSource::OpenMeteo {
                location: LatLon(50.9808, 11.3290),
            },
            QueryRange::single_day(at(0, 0).date()),
        )
    }

    fn sensor(readings: &[(NaiveDateTime, f64)]) -> SensorTable {
        SensorTable::new(
            readings
                .iter()
                .map(|(datetime, value)| SensorRecord {
                    datetime: *datetime,
                    value: *value,
                })
                .collect(),
            "IR20-E-korrigiert".to_string(),
            0,
        )
    }

    #[test]
    fn test_hourly_means_average_within_hour() {
        let table = sensor(&[(at(0, 5), -80.0), (at(0, 55), -90.0), (at(2, 0), -70.0)]);
        let hourly = hourly_means(&table).unwrap();
        assert_eq!(hourly.height(), 2);
        assert_eq!(f64_values(&hourly, SENSOR_MEAN).unwrap(), vec![Some(-85.0), Some(-70.0)]);
        assert_eq!(f64_values(&hourly, SENSOR_SAMPLES).unwrap(), vec![Some(2.0), Some(1.0)]);
    }

    #[test]
    fn test_merge_keeps_every_weather_hour() {
        let weather = weather(&[0, 1, 2], &[5.0, 5.5, 6.0], &[Some(1.0), Some(0.5), None]);
        let table = sensor(&[
            (at(0, 5), -80.0),
            (at(0, 55), -90.0),
            (at(2, 0), -70.0),
            (at(5, 0), -60.0),
        ]);
        let view = merge(&weather, &table).unwrap();
        assert_eq!(view.height(), 3);
        assert_eq!(view.matched_hours(), 2);
        assert_eq!(
            f64_values(&view.frame, SENSOR_MEAN).unwrap(),
            vec![Some(-85.0), None, Some(-70.0)]
        );
        assert_eq!(f64_values(&view.frame, TEMP).unwrap(), vec![Some(5.0), Some(5.5), Some(6.0)]);
    }

    #[test]
    fn test_correlation() {
        let weather = weather(&[0, 1, 2, 3], &[1.0, 2.0, 3.0, 4.0], &[Some(0.0), None, Some(1.0), Some(1.0)]);
        let table = sensor(&[(at(0, 0), 10.0), (at(1, 0), 20.0), (at(2, 0), 30.0), (at(3, 0), 40.0)]);
        let view = merge(&weather, &table).unwrap();
        let r = view.correlation(TEMP).unwrap().unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert!(view.correlation(CLOUD_COVER_PROXY).unwrap().unwrap() > 0.0);

        let single = sensor(&[(at(0, 0), 10.0)]);
        let view = merge(&weather, &single).unwrap();
        assert_eq!(view.correlation(TEMP).unwrap(), None);
    }
}
