//! CSV export of the rendered tables, and the matching import.

use crate::error::WxSenseError;
use crate::utils::datetime_column;
use chrono::{NaiveDate, NaiveDateTime};
use log::info;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

/// ISO 8601 with milliseconds, the resolution of every datetime column here.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Writes `df` as a comma separated file with a header row. Datetimes are
/// written as ISO 8601, missing values as empty fields. Blocking.
pub fn export_csv(df: &DataFrame, path: &Path) -> Result<(), WxSenseError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| WxSenseError::Io(parent.to_path_buf(), e))?;
    }
    let file = File::create(path).map_err(|e| WxSenseError::Io(path.to_path_buf(), e))?;
    let mut df = df.clone();
    CsvWriter::new(file)
        .include_header(true)
        .with_datetime_format(Some(DATETIME_FORMAT.to_string()))
        .with_date_format(Some(DATE_FORMAT.to_string()))
        .finish(&mut df)
        .map_err(|e| WxSenseError::Export(path.to_path_buf(), e))?;
    info!("Exported {} rows to {}", df.height(), path.display());
    Ok(())
}

/// Reads a file written by [`export_csv`] back, restoring the column types of
/// `schema`. Columns not in `schema` are ignored.
pub fn import_csv(path: &Path, schema: &Schema) -> Result<DataFrame, WxSenseError> {
    let import_error = |e| WxSenseError::Import(path.to_path_buf(), e);
    let raw = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(import_error)?
        .finish()
        .map_err(import_error)?;

    let columns = schema
        .iter()
        .map(|(name, dtype)| restore_column(raw.column(name.as_str())?, dtype))
        .collect::<PolarsResult<Vec<Column>>>()
        .map_err(import_error)?;
    DataFrame::new(columns).map_err(import_error)
}

fn restore_column(column: &Column, dtype: &DataType) -> PolarsResult<Column> {
    let name = column.name().as_str();
    match dtype {
        DataType::Datetime(_, _) => {
            let values = column
                .cast(&DataType::String)?
                .str()?
                .into_iter()
                .map(|v| {
                    v.map(|s| {
                        parse_or_err(s, |s| NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok())
                    })
                    .transpose()
                })
                .collect::<PolarsResult<Vec<Option<NaiveDateTime>>>>()?;
            datetime_column(name, values)?.cast(dtype)
        }
        DataType::Date => {
            let epoch = NaiveDate::default();
            let days = column
                .cast(&DataType::String)?
                .str()?
                .into_iter()
                .map(|v| {
                    v.map(|s| {
                        parse_or_err(s, |s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
                            .map(|d| (d - epoch).num_days() as i32)
                    })
                    .transpose()
                })
                .collect::<PolarsResult<Vec<Option<i32>>>>()?;
            Series::new(name.into(), days).cast(dtype).map(Column::from)
        }
        other => column.cast(other),
    }
}

fn parse_or_err<T>(value: &str, parse: impl Fn(&str) -> Option<T>) -> PolarsResult<T> {
    parse(value).ok_or_else(|| {
        PolarsError::ComputeError(format!("cannot parse '{}' as a date or datetime", value).into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::DATETIME;
    use chrono::TimeDelta;

    fn table() -> DataFrame {
        let start = NaiveDate::from_ymd_opt(2024, 10, 31)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        let times = (0..3).map(|i| Some(start + TimeDelta::minutes(45 * i)));
        let mut df = df!(
            "temp" => [Some(4.5), None, Some(-0.1)],
            "sensor_mean" => [Some(-85.123456789), Some(0.25), None],
            "sensor_samples" => [Some(3u32), None, Some(360u32)],
            "note" => [Some("a;b"), None, Some("ü")],
            "snow" => [None::<f64>, None, None],
        )
        .unwrap();
        df.insert_column(0, datetime_column(DATETIME, times).unwrap()).unwrap();
        df.lazy()
            .with_column(col(DATETIME).dt().date().alias("date"))
            .collect()
            .unwrap()
    }

    #[test]
    fn test_export_then_import_reproduces_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports").join("merged.csv");
        let original = table();

        export_csv(&original, &path).unwrap();
        let restored = import_csv(&path, &original.schema()).unwrap();

        assert_eq!(restored.schema(), original.schema());
        assert!(restored.equals_missing(&original));
    }

    #[test]
    fn test_datetimes_are_written_as_iso() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.csv");
        export_csv(&table(), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("datetime,temp,sensor_mean,sensor_samples,note,snow,date")
        );
        assert!(lines.next().unwrap().starts_with("2024-10-31T23:00:00.000,4.5,"));
    }

    #[test]
    fn test_unparseable_datetime_is_an_import_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.csv");
        std::fs::write(&path, "datetime,temp\nyesterday,1.0\n").unwrap();
        let schema = table().select([DATETIME, "temp"]).unwrap().schema().clone();
        let result = import_csv(&path, &schema);
        assert!(matches!(result, Err(WxSenseError::Import(_, _))));
    }
}
