//! Hourly reanalysis data from the Open-Meteo historical weather API.

use crate::types::lat_lon::LatLon;
use crate::types::query_range::QueryRange;
use crate::utils::{datetime_column, DATETIME};
use crate::weather::error::WeatherDataError;
use crate::weather::frame::{CLOUD_COVER_PROXY, PRES, TEMP, TSUN, WSPD};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use polars::prelude::*;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

/// Variables requested for the per-location weather charts.
pub const HOURLY_VARIABLES: [&str; 9] = [
    "temperature_2m",
    "relative_humidity_2m",
    "dew_point_2m",
    "precipitation",
    "pressure_msl",
    "cloud_cover",
    "wind_speed_10m",
    "wind_direction_10m",
    "sunshine_duration",
];

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    reason: String,
}

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }

    /// Fetches `variables` for every hour of the days `start..=end`, with
    /// timestamps expressed in `timezone`. Each variable becomes a `Float64`
    /// column named as requested; missing values are null.
    pub async fn fetch_variables(
        &self,
        location: LatLon,
        start: NaiveDate,
        end: NaiveDate,
        variables: &[&str],
        timezone: &str,
    ) -> Result<DataFrame, WeatherDataError> {
        let url = self.base_url.clone();
        info!(
            "Requesting {} hourly variables for {} from {} ({} .. {})",
            variables.len(),
            location,
            url,
            start,
            end
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", location.lat().to_string()),
                ("longitude", location.lon().to_string()),
                ("start_date", start.format("%Y-%m-%d").to_string()),
                ("end_date", end.format("%Y-%m-%d").to_string()),
                ("hourly", variables.join(",")),
                ("timezone", timezone.to_string()),
                ("wind_speed_unit", "kmh".to_string()),
            ])
            .send()
            .await
            .map_err(|e| WeatherDataError::NetworkRequest(url.clone(), e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WeatherDataError::NetworkRequest(url.clone(), e))?;

        if !status.is_success() {
            let reason = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.reason)
                .unwrap_or(body);
            warn!("Open-Meteo rejected request ({}): {}", status, reason);
            return Err(WeatherDataError::ApiRejected { url, status, reason });
        }

        let json: Value = serde_json::from_str(&body).map_err(|source| {
            WeatherDataError::JsonDecode {
                url: url.clone(),
                source,
            }
        })?;
        hourly_table(&json, variables, &url)
    }

    /// Hourly weather for `location` restricted to `range`, with columns renamed
    /// to the canonical weather names and the cloud cover proxy derived from
    /// `cloud_cover`.
    pub async fn hourly_weather(
        &self,
        location: LatLon,
        range: &QueryRange,
        timezone: &str,
    ) -> Result<DataFrame, WeatherDataError> {
        let raw = self
            .fetch_variables(location, range.start(), range.end(), &HOURLY_VARIABLES, timezone)
            .await?;
        let df = canonical_columns(raw.lazy(), range).collect()?;
        debug!("Open-Meteo returned {} hours for {}", df.height(), range);
        Ok(df)
    }
}

fn hourly_table(json: &Value, variables: &[&str], url: &str) -> Result<DataFrame, WeatherDataError> {
    let missing = |field: &str| WeatherDataError::MissingField {
        url: url.to_string(),
        field: field.to_string(),
    };
    let hourly = json.get("hourly").ok_or_else(|| missing("hourly"))?;
    let times = hourly
        .get("time")
        .and_then(Value::as_array)
        .ok_or_else(|| missing("hourly.time"))?;

    let datetimes = times
        .iter()
        .map(|t| {
            let text = t.as_str().unwrap_or_default();
            NaiveDateTime::parse_from_str(text, TIME_FORMAT).map_err(|_| {
                WeatherDataError::Timestamp {
                    value: t.to_string(),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut columns = vec![datetime_column(DATETIME, datetimes.into_iter().map(Some))?];
    for variable in variables {
        let values = hourly
            .get(*variable)
            .and_then(Value::as_array)
            .ok_or_else(|| missing(&format!("hourly.{}", variable)))?;
        let values: Vec<Option<f64>> = (0..times.len())
            .map(|i| values.get(i).and_then(Value::as_f64))
            .collect();
        columns.push(Column::new((*variable).into(), values));
    }
    Ok(DataFrame::new(columns)?)
}

/// Maps Open-Meteo names onto the shared weather columns. Sunshine duration
/// arrives in seconds and is stored in minutes.
pub(crate) fn canonical_columns(lazy: LazyFrame, range: &QueryRange) -> LazyFrame {
    lazy.filter(
        col(DATETIME)
            .gt_eq(lit(range.start_datetime()))
            .and(col(DATETIME).lt_eq(lit(range.end_datetime()))),
    )
    .select([
        col(DATETIME),
        col("temperature_2m").alias(TEMP),
        col("relative_humidity_2m").alias("rhum"),
        col("dew_point_2m").alias("dwpt"),
        col("precipitation").alias("prcp"),
        col("wind_direction_10m").alias("wdir"),
        col("wind_speed_10m").alias(WSPD),
        col("pressure_msl").alias(PRES),
        (col("sunshine_duration") / lit(60.0)).alias(TSUN),
        col("cloud_cover"),
        (col("cloud_cover") / lit(100.0)).alias(CLOUD_COVER_PROXY),
    ])
    .sort([DATETIME], Default::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{f64_values, naive_datetimes};
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn archive_body() -> Value {
        let times: Vec<String> = (0..24)
            .map(|h| format!("2024-10-31T{:02}:00", h))
            .chain(["2024-11-01T00:00".to_string(), "2024-11-01T01:00".to_string()])
            .collect();
        let hours = times.len();
        let series = |v: Option<f64>| vec![v; hours];
        let mut cloud = series(Some(50.0));
        cloud[0] = Some(100.0);
        let mut sunshine = series(Some(1800.0));
        sunshine[1] = None;
        json!({
            "latitude": 50.98,
            "longitude": 11.33,
            "timezone": "GMT",
            "hourly": {
                "time": times,
                "temperature_2m": series(Some(6.5)),
                "relative_humidity_2m": series(Some(88.0)),
                "dew_point_2m": series(Some(4.6)),
                "precipitation": series(Some(0.0)),
                "pressure_msl": series(Some(1021.4)),
                "cloud_cover": cloud,
                "wind_speed_10m": series(Some(9.4)),
                "wind_direction_10m": series(Some(230.0)),
                "sunshine_duration": sunshine,
            }
        })
    }

    fn range() -> QueryRange {
        QueryRange::single_day(NaiveDate::from_ymd_opt(2024, 10, 31).unwrap())
    }

    #[tokio::test]
    async fn test_hourly_weather_renames_and_trims_to_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("start_date", "2024-10-31"))
            .and(query_param("end_date", "2024-11-01"))
            .and(query_param("timezone", "GMT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(archive_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(Client::new(), &server.uri());
        let df = client
            .hourly_weather(LatLon(50.9808, 11.3290), &range(), "GMT")
            .await
            .unwrap();

        assert_eq!(df.height(), 25);
        let datetimes = naive_datetimes(&df, DATETIME).unwrap();
        assert_eq!(datetimes.last().copied().flatten(), Some(range().end_datetime()));

        let proxy = f64_values(&df, CLOUD_COVER_PROXY).unwrap();
        assert_eq!(proxy[0], Some(1.0));
        assert_eq!(proxy[1], Some(0.5));
        let tsun = f64_values(&df, TSUN).unwrap();
        assert_eq!(tsun[0], Some(30.0));
        assert_eq!(tsun[1], None);
        assert_eq!(f64_values(&df, PRES).unwrap()[3], Some(1021.4));
        assert!(df.column("temperature_2m").is_err());
    }

    #[tokio::test]
    async fn test_rejected_request_carries_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": true,
                "reason": "Parameter 'start_date' is out of allowed range"
            })))
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(Client::new(), &server.uri());
        let err = client
            .hourly_weather(LatLon(50.9808, 11.3290), &range(), "GMT")
            .await
            .unwrap_err();
        match err {
            WeatherDataError::ApiRejected { status, reason, .. } => {
                assert_eq!(status.as_u16(), 400);
                assert!(reason.contains("start_date"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_variable_is_reported() {
        let body = json!({ "hourly": { "time": ["2024-10-31T00:00"], "pressure_msl": [1020.0] } });
        let err = hourly_table(&body, &["pressure_msl", "cloud_cover"], "http://test").unwrap_err();
        assert!(matches!(
            err,
            WeatherDataError::MissingField { ref field, .. } if field == "hourly.cloud_cover"
        ));
    }

    #[test]
    fn test_null_values_become_nulls() {
        let body = json!({
            "hourly": {
                "time": ["2024-10-31T00:00", "2024-10-31T01:00"],
                "pressure_msl": [1020.0, null]
            }
        });
        let df = hourly_table(&body, &["pressure_msl"], "http://test").unwrap();
        assert_eq!(f64_values(&df, "pressure_msl").unwrap(), vec![Some(1020.0), None]);
    }
}
