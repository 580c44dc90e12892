//! Downloads, caches and prepares hourly station data from the Meteostat bulk archive.

use crate::types::query_range::QueryRange;
use crate::utils::{datetime_column, DATETIME};
use crate::weather::error::WeatherDataError;
use crate::weather::frame::{CLOUD_COVER_PROXY, TSUN};
use async_compression::tokio::bufread::GzipDecoder;
use chrono::NaiveDate;
use futures_util::TryStreamExt;
use log::{debug, info, warn};
use polars::prelude::*;
use reqwest::Client;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio::{fs, task};
use tokio_util::io::StreamReader;

/// Column layout of the headerless Meteostat hourly CSV files.
pub const HOURLY_COLUMNS: [&str; 13] = [
    "date", "hour", "temp", "dwpt", "rhum", "prcp", "snow", "wdir", "wspd", "wpgt", "pres",
    "tsun", "coco",
];

pub struct MeteostatLoader {
    cache_dir: PathBuf,
    base_url: String,
    download_client: Client,
}

impl MeteostatLoader {
    pub fn new(cache_dir: &Path, base_url: &str, download_client: Client) -> MeteostatLoader {
        MeteostatLoader {
            cache_dir: cache_dir.to_path_buf(),
            base_url: base_url.trim_end_matches('/').to_string(),
            download_client,
        }
    }

    /// Hourly data of `station` restricted to `range`, sorted by time, with the
    /// cloud cover proxy derived from sunshine minutes.
    pub async fn hourly_frame(
        &self,
        station: &str,
        range: &QueryRange,
    ) -> Result<DataFrame, WeatherDataError> {
        let lazy = self.get_frame(station, range).await?;
        let df = prepare_hourly(lazy, range).collect()?;
        debug!(
            "Station {} has {} hourly rows for {}",
            station,
            df.height(),
            range
        );
        Ok(df)
    }

    /// Returns the cached parquet file as a LazyFrame, downloading it first when it
    /// is missing or was written before the end of the requested range.
    async fn get_frame(
        &self,
        station: &str,
        range: &QueryRange,
    ) -> Result<LazyFrame, WeatherDataError> {
        let parquet_path = self.cache_dir.join(format!("hourly-{}.parquet", station));

        if self.cache_is_fresh(&parquet_path, range).await? {
            info!("Cache hit for hourly data of station {} at {:?}", station, parquet_path);
        } else {
            warn!(
                "Cache miss for hourly data of station {}. Downloading and processing.",
                station
            );
            let raw_bytes = self.download(station).await?;
            let df = Self::csv_to_dataframe(raw_bytes, station).await?;

            fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(|e| WeatherDataError::CacheDirCreation(self.cache_dir.clone(), e))?;
            Self::cache_dataframe(df, &parquet_path).await?;
            info!("Cached hourly data for station {} to {:?}", station, parquet_path);
        }

        LazyFrame::scan_parquet(&parquet_path, Default::default())
            .map_err(|e| WeatherDataError::ParquetScan(parquet_path.clone(), e))
    }

    async fn cache_is_fresh(
        &self,
        parquet_path: &Path,
        range: &QueryRange,
    ) -> Result<bool, WeatherDataError> {
        let metadata = match fs::metadata(parquet_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(WeatherDataError::CacheMetadataRead(
                    parquet_path.to_path_buf(),
                    e,
                ))
            }
        };
        let modified = metadata
            .modified()
            .map_err(|e| WeatherDataError::CacheMetadataRead(parquet_path.to_path_buf(), e))?;
        // A file written before the range ended cannot hold all of its hours.
        Ok(modified >= SystemTime::from(range.end_datetime().and_utc()))
    }

    async fn download(&self, station: &str) -> Result<Vec<u8>, WeatherDataError> {
        let url = format!("{}/hourly/{}.csv.gz", self.base_url, station);
        info!("Downloading data from {}", url);

        let response = self
            .download_client
            .get(&url)
            .send()
            .await
            .map_err(|e| WeatherDataError::NetworkRequest(url.clone(), e))?;

        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                warn!("HTTP error for {}: {:?}", url, e);
                return Err(match e.status() {
                    Some(status) => WeatherDataError::HttpStatus {
                        url,
                        status,
                        source: e,
                    },
                    None => WeatherDataError::NetworkRequest(url, e),
                });
            }
        };

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut decoder = GzipDecoder::new(StreamReader::new(stream));
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).await?;
        info!(
            "Downloaded and decompressed {} bytes for station {}",
            decompressed.len(),
            station
        );
        Ok(decompressed)
    }

    /// Parses raw headerless CSV bytes, names the columns and replaces
    /// `date`/`hour` with a single millisecond `datetime` column.
    async fn csv_to_dataframe(bytes: Vec<u8>, station: &str) -> Result<DataFrame, WeatherDataError> {
        let station_owned = station.to_string();

        task::spawn_blocking(move || {
            let io_error = |source| WeatherDataError::CsvReadIo {
                station: station_owned.clone(),
                source,
            };
            let mut temp_file = NamedTempFile::new().map_err(io_error)?;
            temp_file.write_all(&bytes).map_err(io_error)?;
            temp_file.flush().map_err(io_error)?;

            let polars_error = |source| WeatherDataError::CsvReadPolars {
                station: station_owned.clone(),
                source,
            };
            let mut df = CsvReadOptions::default()
                .with_has_header(false)
                .with_infer_schema_length(None)
                .try_into_reader_with_file_path(Some(temp_file.path().to_path_buf()))
                .map_err(polars_error)?
                .finish()
                .map_err(polars_error)?;

            if df.width() != HOURLY_COLUMNS.len() {
                warn!(
                    "CSV column count ({}) does not match schema length ({}) for station {}",
                    df.width(),
                    HOURLY_COLUMNS.len(),
                    station_owned
                );
                return Err(WeatherDataError::SchemaMismatch {
                    station: station_owned,
                    expected: HOURLY_COLUMNS.len(),
                    found: df.width(),
                });
            }
            df.set_column_names(HOURLY_COLUMNS).map_err(polars_error)?;

            let dates = df.column("date")?.cast(&DataType::String)?;
            let hours = df.column("hour")?.cast(&DataType::Int64)?;
            let datetimes = dates
                .str()?
                .into_iter()
                .zip(hours.i64()?.into_iter())
                .map(|(date, hour)| {
                    let date = NaiveDate::parse_from_str(date?, "%Y-%m-%d").ok()?;
                    date.and_hms_opt(u32::try_from(hour?).ok()?, 0, 0)
                });
            df.with_column(datetime_column(DATETIME, datetimes)?)?;

            let mut columns = vec![col(DATETIME)];
            columns.extend(
                HOURLY_COLUMNS[2..]
                    .iter()
                    .map(|name| col(*name).cast(DataType::Float64)),
            );
            let df = df
                .lazy()
                .filter(col(DATETIME).is_not_null())
                .select(columns)
                .collect()?;
            Ok(df)
        })
        .await?
    }

    async fn cache_dataframe(mut df: DataFrame, path: &Path) -> Result<(), WeatherDataError> {
        let path_buf = path.to_path_buf();
        task::spawn_blocking(move || {
            let file = std::fs::File::create(&path_buf)
                .map_err(|e| WeatherDataError::ParquetWriteIo(path_buf.clone(), e))?;
            ParquetWriter::new(file)
                .with_compression(ParquetCompression::Snappy)
                .finish(&mut df)
                .map_err(|e| WeatherDataError::ParquetWritePolars(path_buf, e))?;
            Ok::<(), WeatherDataError>(())
        })
        .await??;
        Ok(())
    }
}

/// Restricts a Meteostat hourly frame to `range` and adds the cloud cover proxy
/// `1 - tsun / 60`: an hour with no sunshine counts as fully covered.
pub(crate) fn prepare_hourly(lazy: LazyFrame, range: &QueryRange) -> LazyFrame {
    let datetime = || col(DATETIME).cast(DataType::Datetime(TimeUnit::Milliseconds, None));
    lazy.filter(
        datetime()
            .gt_eq(lit(range.start_datetime()))
            .and(datetime().lt_eq(lit(range.end_datetime()))),
    )
    .with_column((lit(1.0) - col(TSUN) / lit(60.0)).alias(CLOUD_COVER_PROXY))
    .sort([DATETIME], Default::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::gzip;
    use crate::utils::{f64_values, naive_datetimes};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HOURLY_CSV: &str = "\
2024-10-30,23,5.0,3.2,90,0.0,,200,6.1,,1021.5,0,3
2024-10-31,0,4.5,3.1,91,0.0,,220,7.2,,1021.3,0,3
2024-10-31,1,4.1,3.0,92,0.0,,210,5.4,,1021.0,30,2
2024-10-31,12,11.2,4.0,60,0.0,,180,9.0,,1019.8,60,1
2024-11-01,0,3.9,2.5,93,0.0,,190,4.0,,1018.2,,4
2024-11-01,1,3.8,2.4,93,0.1,,190,3.6,,1018.0,0,7
";

    fn range() -> QueryRange {
        QueryRange::single_day(NaiveDate::from_ymd_opt(2024, 10, 31).unwrap())
    }

    async fn serve(body: &str, expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hourly/11155.csv.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(gzip(body.as_bytes()).await))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_hourly_frame_filters_range_and_derives_proxy() -> Result<(), Box<dyn std::error::Error>> {
        let server = serve(HOURLY_CSV, 1).await;
        let cache = tempfile::tempdir()?;
        let loader = MeteostatLoader::new(cache.path(), &server.uri(), Client::new());

        let df = loader.hourly_frame("11155", &range()).await?;
        assert_eq!(df.height(), 4, "rows from 2024-10-31 00:00 to 2024-11-01 00:00");
        assert!(df.column("date").is_err());
        assert_eq!(
            df.column(DATETIME)?.dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, None)
        );

        let datetimes = naive_datetimes(&df, DATETIME)?;
        assert_eq!(
            datetimes.first().copied().flatten(),
            NaiveDate::from_ymd_opt(2024, 10, 31).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(
            f64_values(&df, CLOUD_COVER_PROXY)?,
            vec![Some(1.0), Some(0.5), Some(0.0), None]
        );
        assert_eq!(f64_values(&df, "snow")?, vec![None; 4]);
        assert!(cache.path().join("hourly-11155.parquet").exists());

        // Served from the parquet cache on the second call.
        let again = loader.hourly_frame("11155", &range()).await?;
        assert_eq!(again.height(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_reported() {
        let server = serve("2024-10-31,0,4.5\n2024-10-31,1,4.1\n", 1).await;
        let cache = tempfile::tempdir().unwrap();
        let loader = MeteostatLoader::new(cache.path(), &server.uri(), Client::new());
        let result = loader.hourly_frame("11155", &range()).await;
        assert!(matches!(
            result,
            Err(WeatherDataError::SchemaMismatch { expected: 13, found: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_station_surfaces_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let cache = tempfile::tempdir().unwrap();
        let loader = MeteostatLoader::new(cache.path(), &server.uri(), Client::new());
        let result = loader.hourly_frame("00000", &range()).await;
        assert!(matches!(result, Err(WeatherDataError::HttpStatus { .. })));
    }
}
