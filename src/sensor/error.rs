use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Failed to read sensor file '{0}'")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Sensor file ends after {lines} lines, before its header row")]
    Truncated { lines: usize },

    #[error("Delimiter and quote must be single-byte characters, got {0:?}")]
    InvalidDelimiter(char),

    #[error("Sensor file has {found} columns; column {index} ({label}) is missing")]
    MissingColumn {
        index: usize,
        label: String,
        found: usize,
    },

    #[error("Sensor file has no rows with a valid timestamp and value ({dropped} rows dropped)")]
    NoValidRows { dropped: usize },

    #[error("Malformed sensor file")]
    Csv(#[from] csv::Error),

    #[error("Unknown timezone '{0}'")]
    Timezone(String),

    #[error("Failed building sensor table")]
    DataFrame(#[from] PolarsError),
}
