use chrono::{DateTime, NaiveDateTime};
use log::info;
use polars::prelude::*;
use std::io;
use std::path::{Path, PathBuf};

const CACHE_DIR_NAME: &str = "wxsense_cache";

/// Name of the timestamp column shared by every table in this crate.
pub const DATETIME: &str = "datetime";

pub fn get_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|p| p.join(CACHE_DIR_NAME))
}

pub async fn ensure_cache_dir_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("Cache path exists but is not a directory: {}", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating cache directory: {}", path.display());
            tokio::fs::create_dir_all(path).await
        }
        Err(e) => Err(e),
    }
}

/// Builds a millisecond `Datetime` column from naive UTC timestamps.
pub fn datetime_column(
    name: &str,
    values: impl IntoIterator<Item = Option<NaiveDateTime>>,
) -> PolarsResult<Column> {
    let millis: Vec<Option<i64>> = values
        .into_iter()
        .map(|dt| dt.map(|dt| dt.and_utc().timestamp_millis()))
        .collect();
    Ok(Series::new(name.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        .into_column())
}

/// Reads a datetime column back as naive UTC timestamps, whatever its time unit.
pub fn naive_datetimes(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<NaiveDateTime>>> {
    let millis = df
        .column(name)?
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        .cast(&DataType::Int64)?;
    Ok(millis
        .i64()?
        .into_iter()
        .map(|ms| ms.and_then(DateTime::from_timestamp_millis).map(|dt| dt.naive_utc()))
        .collect())
}

/// Reads any numeric column as `f64` values, keeping nulls.
pub fn f64_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let values = df.column(name)?.cast(&DataType::Float64)?;
    Ok(values.f64()?.into_iter().collect())
}

/// True when the column exists and holds at least one non-null value.
pub fn has_data(df: &DataFrame, name: &str) -> bool {
    df.column(name)
        .map(|c| c.null_count() < c.len())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_datetime_column_round_trip() -> PolarsResult<()> {
        let first = NaiveDate::from_ymd_opt(2024, 10, 31)
            .unwrap()
            .and_hms_opt(13, 0, 0)
            .unwrap();
        let column = datetime_column(DATETIME, [Some(first), None])?;
        assert_eq!(
            column.dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, None)
        );
        let df = DataFrame::new(vec![column])?;
        assert_eq!(naive_datetimes(&df, DATETIME)?, vec![Some(first), None]);
        Ok(())
    }

    #[test]
    fn test_has_data_and_f64_values() -> PolarsResult<()> {
        let df = df!(
            "temp" => [Some(1i64), None],
            "snow" => [None::<f64>, None],
        )?;
        assert!(has_data(&df, "temp"));
        assert!(!has_data(&df, "snow"));
        assert!(!has_data(&df, "missing"));
        assert_eq!(f64_values(&df, "temp")?, vec![Some(1.0), None]);
        Ok(())
    }
}
