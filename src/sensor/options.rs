use crate::sensor::error::SensorError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// How to read a logger export. The defaults match the IR20 radiometer logger:
/// seven preamble lines, `;` separated, quoted fields, date and time in the first
/// two columns and the corrected longwave channel in column 16.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorOptions {
    pub delimiter: char,
    pub quote: char,
    /// Lines before the header row.
    pub skip_rows: usize,
    pub date_column: usize,
    pub time_column: usize,
    pub value_column: usize,
    /// Used when the header row has no name for the value column.
    pub value_label: String,
    pub downsample_step: usize,
    pub rolling_window: usize,
    /// IANA zone of the logger clock. Timestamps are taken as UTC when unset.
    pub timezone: Option<String>,
}

impl Default for SensorOptions {
    fn default() -> Self {
        Self {
            delimiter: ';',
            quote: '"',
            skip_rows: 7,
            date_column: 0,
            time_column: 1,
            value_column: 16,
            value_label: "IR20-E-korrigiert".to_string(),
            downsample_step: 10,
            rolling_window: 30,
            timezone: None,
        }
    }
}

impl SensorOptions {
    pub(crate) fn delimiter_byte(&self) -> Result<u8, SensorError> {
        single_byte(self.delimiter)
    }

    pub(crate) fn quote_byte(&self) -> Result<u8, SensorError> {
        single_byte(self.quote)
    }

    pub fn parsed_timezone(&self) -> Result<Option<Tz>, SensorError> {
        self.timezone
            .as_deref()
            .map(|name| {
                name.parse::<Tz>()
                    .map_err(|_| SensorError::Timezone(name.to_string()))
            })
            .transpose()
    }
}

fn single_byte(c: char) -> Result<u8, SensorError> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or(SensorError::InvalidDelimiter(c))
}
