use crate::utils::{datetime_column, f64_values, DATETIME};
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;

pub const DATE: &str = "date";
pub const SENSOR_VALUE: &str = "sensor_value";
pub const ROLLING_MEAN: &str = "rolling_mean";

/// One valid sensor reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorRecord {
    pub datetime: NaiveDateTime,
    pub value: f64,
}

/// The valid rows of one sensor file, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorTable {
    records: Vec<SensorRecord>,
    value_label: String,
    dropped_rows: usize,
}

impl SensorTable {
    pub fn new(records: Vec<SensorRecord>, value_label: String, dropped_rows: usize) -> Self {
        Self {
            records,
            value_label,
            dropped_rows,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SensorRecord] {
        &self.records
    }

    /// Header name of the value column, e.g. `IR20-E-korrigiert`.
    pub fn value_label(&self) -> &str {
        &self.value_label
    }

    /// Rows of the source file that were skipped for an unparseable timestamp or value.
    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    /// Earliest and latest timestamp.
    pub fn span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let first = self.records.iter().map(|r| r.datetime).min()?;
        let last = self.records.iter().map(|r| r.datetime).max()?;
        Some((first, last))
    }

    /// Calendar dates in order of first appearance.
    pub fn unique_dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = Vec::new();
        for record in &self.records {
            let date = record.datetime.date();
            if !dates.contains(&date) {
                dates.push(date);
            }
        }
        dates
    }

    /// The rows of a single calendar date.
    pub fn day(&self, date: NaiveDate) -> SensorTable {
        self.filtered(|r| r.datetime.date() == date)
    }

    /// Every `step`-th row, starting with the first. A step of 0 is treated as 1.
    pub fn downsampled(&self, step: usize) -> SensorTable {
        SensorTable {
            records: self.records.iter().step_by(step.max(1)).copied().collect(),
            value_label: self.value_label.clone(),
            dropped_rows: 0,
        }
    }

    fn filtered(&self, keep: impl Fn(&SensorRecord) -> bool) -> SensorTable {
        SensorTable {
            records: self.records.iter().filter(|r| keep(r)).copied().collect(),
            value_label: self.value_label.clone(),
            dropped_rows: 0,
        }
    }

    /// `datetime`, `date` and `sensor_value` columns.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let datetimes = datetime_column(DATETIME, self.records.iter().map(|r| Some(r.datetime)))?;
        let values = Column::new(
            SENSOR_VALUE.into(),
            self.records.iter().map(|r| r.value).collect::<Vec<f64>>(),
        );
        DataFrame::new(vec![datetimes, values])?
            .lazy()
            .with_column(col(DATETIME).dt().date().alias(DATE))
            .select([col(DATETIME), col(DATE), col(SENSOR_VALUE)])
            .collect()
    }

    /// [`Self::to_dataframe`] plus a `rolling_mean` column over `window` rows.
    /// The first `window - 1` rows have no mean.
    pub fn with_rolling_mean(&self, window: usize) -> PolarsResult<DataFrame> {
        let window = window.max(1);
        self.to_dataframe()?
            .lazy()
            .with_column(
                col(SENSOR_VALUE)
                    .rolling_mean(RollingOptionsFixedWindow {
                        window_size: window,
                        min_periods: window,
                        ..Default::default()
                    })
                    .alias(ROLLING_MEAN),
            )
            .collect()
    }

    pub fn rolling_mean(&self, window: usize) -> PolarsResult<Vec<Option<f64>>> {
        f64_values(&self.with_rolling_mean(window)?, ROLLING_MEAN)
    }
}
