//! Reads logger exports into a [`SensorTable`].

use crate::sensor::error::SensorError;
use crate::sensor::options::SensorOptions;
use crate::sensor::table::{SensorRecord, SensorTable};
use chrono::{Datelike, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use log::{debug, info, warn};
use std::path::Path;

/// Accepted `date time` layouts, day first. `%.f` also matches no fraction.
const DATETIME_FORMATS: [&str; 8] = [
    "%d.%m.%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S%.f",
    "%d.%m.%y %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Reads and parses a sensor file from disk.
pub async fn read_sensor_file(path: &Path, options: &SensorOptions) -> Result<SensorTable, SensorError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SensorError::Io(path.to_path_buf(), e))?;
    info!("Read {} bytes of sensor data from {}", bytes.len(), path.display());
    parse_sensor_file(&bytes, options)
}

/// Parses an ISO-8859-1 encoded logger export.
///
/// Rows whose timestamp or value does not parse are dropped and counted in
/// [`SensorTable::dropped_rows`]. Rows keep their order in the file.
///
/// # Errors
///
/// * [`SensorError::Truncated`] when the file has no header row after the preamble.
/// * [`SensorError::MissingColumn`] when the header is narrower than the configured columns.
/// * [`SensorError::NoValidRows`] when every data row was dropped.
pub fn parse_sensor_file(bytes: &[u8], options: &SensorOptions) -> Result<SensorTable, SensorError> {
    let timezone = options.parsed_timezone()?;
    let text = decode_latin1(bytes);
    let body = skip_lines(&text, options.skip_rows)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter_byte()?)
        .quote(options.quote_byte()?)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = reader.headers()?.clone();
    for (index, label) in [
        (options.date_column, "date"),
        (options.time_column, "time"),
        (options.value_column, options.value_label.as_str()),
    ] {
        if index >= headers.len() {
            return Err(SensorError::MissingColumn {
                index,
                label: label.to_string(),
                found: headers.len(),
            });
        }
    }
    let value_label = headers
        .get(options.value_column)
        .filter(|name| !name.is_empty())
        .unwrap_or(options.value_label.as_str())
        .to_string();

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping unreadable sensor row {}: {}", line + 1, e);
                dropped += 1;
                continue;
            }
        };
        let parsed = parse_timestamp(
            record.get(options.date_column).unwrap_or_default(),
            record.get(options.time_column).unwrap_or_default(),
            timezone,
        )
        .zip(record.get(options.value_column).and_then(parse_value));

        match parsed {
            Some((datetime, value)) => records.push(SensorRecord { datetime, value }),
            None => dropped += 1,
        }
    }

    if records.is_empty() {
        return Err(SensorError::NoValidRows { dropped });
    }
    if dropped > 0 {
        warn!("Dropped {} sensor rows with an invalid timestamp or value", dropped);
    }
    info!("Parsed {} sensor rows of '{}'", records.len(), value_label);
    Ok(SensorTable::new(records, value_label, dropped))
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn skip_lines(text: &str, lines: usize) -> Result<&str, SensorError> {
    let mut rest = text;
    for seen in 0..lines {
        match rest.find('\n') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return Err(SensorError::Truncated { lines: seen }),
        }
    }
    if rest.trim().is_empty() {
        return Err(SensorError::Truncated { lines });
    }
    Ok(rest)
}

/// Combines the date and time fields, day first. With a logger timezone the
/// local time is converted to UTC; nonexistent local times are dropped.
pub(crate) fn parse_timestamp(date: &str, time: &str, timezone: Option<Tz>) -> Option<NaiveDateTime> {
    let combined = format!("{} {}", date.trim(), time.trim());
    let local = DATETIME_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(&combined, format)
            .ok()
            .filter(|dt| dt.year() >= 1900)
    })?;
    match timezone {
        Some(tz) => tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.naive_utc()),
        None => Some(local),
    }
}

/// Accepts `.` or `,` as decimal separator. Non-finite values are rejected.
pub(crate) fn parse_value(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    let normalized = if field.contains(',') && !field.contains('.') {
        field.replace(',', ".")
    } else {
        field.to_string()
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}
