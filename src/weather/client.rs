//! The entry point for hourly weather: picks a provider, locates stations and
//! hands back a [`WeatherFrame`] restricted to the requested window.

use crate::error::WxSenseError;
use crate::stations::locate_station::{InventoryFilter, StationLocator};
use crate::types::lat_lon::LatLon;
use crate::types::query_range::QueryRange;
use crate::types::station::Station;
use crate::utils::{ensure_cache_dir_exists, get_cache_dir};
use crate::weather::frame::{WeatherFrame, WeatherProvider, WeatherSource};
use crate::weather::meteostat::MeteostatLoader;
use crate::weather::open_meteo::{OpenMeteoClient, DEFAULT_ARCHIVE_URL};
use bon::bon;
use log::{info, warn};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;

pub const DEFAULT_METEOSTAT_URL: &str = "https://bulk.meteostat.net/v2";
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 50.0;
pub const DEFAULT_STATION_LIMIT: usize = 3;
/// Timestamps of the weather charts are requested in UTC so they line up with
/// the sensor series.
pub const DEFAULT_TIMEZONE: &str = "GMT";

/// Client for hourly weather data from Meteostat or Open-Meteo.
///
/// The Meteostat station list is only downloaded when a request first needs it.
///
/// ```no_run
/// # use wxsense::{LatLon, QueryRange, WeatherClient, WxSenseError};
/// # use chrono::NaiveDate;
/// # async fn run() -> Result<(), WxSenseError> {
/// let client = WeatherClient::builder().build().await?;
/// let range = QueryRange::single_day(NaiveDate::from_ymd_opt(2024, 10, 31).unwrap());
/// let weather = client
///     .hourly()
///     .location(LatLon(50.9808, 11.3290))
///     .range(range)
///     .call()
///     .await?;
/// println!("{}", weather.summary()?);
/// # Ok(())
/// # }
/// ```
pub struct WeatherClient {
    cache_dir: PathBuf,
    http: Client,
    meteostat_url: String,
    meteostat: MeteostatLoader,
    open_meteo: OpenMeteoClient,
    timezone: String,
    station_locator: OnceCell<StationLocator>,
}

#[bon]
impl WeatherClient {
    /// Creates the client. Every setting has a default: the cache lives in the
    /// user's cache directory and both providers use their public endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`WxSenseError::CacheDirResolution`] when no cache directory can
    /// be determined and [`WxSenseError::CacheDirCreation`] when it cannot be created.
    #[builder]
    pub async fn new(
        cache_dir: Option<PathBuf>,
        meteostat_url: Option<String>,
        open_meteo_url: Option<String>,
        timezone: Option<String>,
        request_timeout: Option<Duration>,
        stations: Option<Vec<Station>>,
    ) -> Result<Self, WxSenseError> {
        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => get_cache_dir().ok_or(WxSenseError::CacheDirResolution)?,
        };
        ensure_cache_dir_exists(&cache_dir)
            .await
            .map_err(|e| WxSenseError::CacheDirCreation(cache_dir.clone(), e))?;

        let mut http = Client::builder();
        if let Some(timeout) = request_timeout {
            http = http.timeout(timeout);
        }
        let http = http.build().map_err(WxSenseError::HttpClient)?;

        let meteostat_url = meteostat_url.unwrap_or_else(|| DEFAULT_METEOSTAT_URL.to_string());
        let open_meteo_url = open_meteo_url.unwrap_or_else(|| DEFAULT_ARCHIVE_URL.to_string());
        let station_locator = match stations {
            Some(stations) => OnceCell::new_with(Some(StationLocator::from_stations(stations))),
            None => OnceCell::new(),
        };

        Ok(Self {
            meteostat: MeteostatLoader::new(&cache_dir, &meteostat_url, http.clone()),
            open_meteo: OpenMeteoClient::new(http.clone(), &open_meteo_url),
            cache_dir,
            http,
            meteostat_url,
            timezone: timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            station_locator,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The Open-Meteo client, for requests with custom variable lists.
    pub fn open_meteo(&self) -> &OpenMeteoClient {
        &self.open_meteo
    }

    /// The station index, loaded from cache or downloaded on first use.
    pub async fn station_locator(&self) -> Result<&StationLocator, WxSenseError> {
        self.station_locator
            .get_or_try_init(|| async {
                StationLocator::new(&self.cache_dir, &self.meteostat_url, &self.http)
                    .await
                    .map_err(WxSenseError::from)
            })
            .await
    }

    /// Stations near `location`, closest first, with their distance in km.
    /// With a `range`, only stations whose hourly inventory covers it are returned.
    #[builder]
    pub async fn find_stations(
        &self,
        location: LatLon,
        range: Option<QueryRange>,
        max_distance_km: Option<f64>,
        station_limit: Option<usize>,
    ) -> Result<Vec<(Station, f64)>, WxSenseError> {
        location.validate()?;
        let max_distance_km = max_distance_km.unwrap_or(DEFAULT_MAX_DISTANCE_KM);
        let station_limit = station_limit.unwrap_or(5);
        let filter = range.map_or(InventoryFilter::AnyHourly, InventoryFilter::HourlyRange);
        Ok(self
            .station_locator()
            .await?
            .query(location, station_limit, max_distance_km, Some(filter)))
    }

    /// Hourly weather for `location` in `range` from the chosen provider
    /// (Meteostat unless told otherwise).
    ///
    /// # Errors
    ///
    /// For Meteostat, [`WxSenseError::NoStationWithinRadius`] when no station with
    /// hourly data is close enough and [`WxSenseError::NoDataFoundForNearbyStations`]
    /// when every candidate failed or had no rows in the range. Provider errors are
    /// passed through as [`WxSenseError::WeatherData`].
    #[builder]
    pub async fn hourly(
        &self,
        location: LatLon,
        range: QueryRange,
        provider: Option<WeatherProvider>,
        max_distance_km: Option<f64>,
        station_limit: Option<usize>,
    ) -> Result<WeatherFrame, WxSenseError> {
        location.validate()?;
        match provider.unwrap_or_default() {
            WeatherProvider::Meteostat => {
                self.hourly_from_nearest_station(
                    location,
                    range,
                    max_distance_km.unwrap_or(DEFAULT_MAX_DISTANCE_KM),
                    station_limit.unwrap_or(DEFAULT_STATION_LIMIT),
                )
                .await
            }
            WeatherProvider::OpenMeteo => {
                let frame = self
                    .open_meteo
                    .hourly_weather(location, &range, &self.timezone)
                    .await?;
                Ok(WeatherFrame::new(
                    frame,
                    WeatherSource::OpenMeteo { location },
                    range,
                ))
            }
        }
    }

    /// Hourly Meteostat data of one known station.
    #[builder]
    pub async fn from_station(
        &self,
        station: &Station,
        range: QueryRange,
        distance_km: Option<f64>,
    ) -> Result<WeatherFrame, WxSenseError> {
        let frame = self.meteostat.hourly_frame(&station.id, &range).await?;
        Ok(WeatherFrame::new(
            frame,
            WeatherSource::Meteostat {
                station_id: station.id.clone(),
                station_name: station.display_name().to_string(),
                distance_km: distance_km.unwrap_or(0.0),
            },
            range,
        ))
    }

    async fn hourly_from_nearest_station(
        &self,
        location: LatLon,
        range: QueryRange,
        max_distance_km: f64,
        station_limit: usize,
    ) -> Result<WeatherFrame, WxSenseError> {
        let locator = self.station_locator().await?;
        let mut candidates = locator.query(
            location,
            station_limit,
            max_distance_km,
            Some(InventoryFilter::HourlyRange(range)),
        );
        if candidates.is_empty() {
            warn!(
                "No station near {} advertises hourly data for {}; trying any station with hourly data",
                location, range
            );
            candidates = locator.query(
                location,
                station_limit,
                max_distance_km,
                Some(InventoryFilter::AnyHourly),
            );
        }
        if candidates.is_empty() {
            return Err(WxSenseError::NoStationWithinRadius {
                radius: max_distance_km,
                lat: location.lat(),
                lon: location.lon(),
            });
        }

        let mut last_error: Option<WxSenseError> = None;
        for (station, distance_km) in candidates.iter() {
            match self
                .from_station()
                .station(station)
                .range(range)
                .distance_km(*distance_km)
                .call()
                .await
            {
                Ok(frame) if !frame.is_empty() => {
                    info!("Using {}", frame.source);
                    return Ok(frame);
                }
                Ok(_) => {
                    warn!(
                        "Station {} ({}) has no hourly rows for {}",
                        station.display_name(),
                        station.id,
                        range
                    );
                }
                Err(e) => {
                    warn!("Fetching station {} failed: {}", station.id, e);
                    last_error = Some(e);
                }
            }
        }

        Err(WxSenseError::NoDataFoundForNearbyStations {
            radius: max_distance_km,
            lat: location.lat(),
            lon: location.lon(),
            stations_tried: candidates.len(),
            last_error: last_error.map(Box::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stations::locate_station::tests::salzkammergut;
    use crate::test_support::gzip;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn range() -> QueryRange {
        QueryRange::single_day(NaiveDate::from_ymd_opt(2024, 10, 31).unwrap())
    }

    const TRAUNKIRCHEN: LatLon = LatLon(47.993, 13.745);

    async fn client(server: &MockServer, cache: &Path) -> WeatherClient {
        WeatherClient::builder()
            .cache_dir(cache.to_path_buf())
            .meteostat_url(server.uri())
            .open_meteo_url(format!("{}/v1/archive", server.uri()))
            .stations(salzkammergut())
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_falls_back_to_next_station_when_closest_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hourly/11155.csv.gz"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        let csv = "2024-10-31,0,4.5,3.1,91,0.0,,220,7.2,,1021.3,0,3\n\
                   2024-10-31,1,4.1,3.0,92,0.0,,210,5.4,,1021.0,30,2\n";
        Mock::given(method("GET"))
            .and(path("/hourly/11150.csv.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(gzip(csv.as_bytes()).await))
            .expect(1)
            .mount(&server)
            .await;

        let cache = tempfile::tempdir().unwrap();
        let client = client(&server, cache.path()).await;
        let frame = client
            .hourly()
            .location(TRAUNKIRCHEN)
            .range(range())
            .call()
            .await
            .unwrap();

        assert_eq!(frame.height(), 2);
        match &frame.source {
            WeatherSource::Meteostat { station_id, .. } => assert_eq!(station_id, "11150"),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_station_within_radius() {
        let server = MockServer::start().await;
        let cache = tempfile::tempdir().unwrap();
        let client = client(&server, cache.path()).await;
        let result = client
            .hourly()
            .location(LatLon(-33.9, 18.4))
            .range(range())
            .call()
            .await;
        assert!(matches!(result, Err(WxSenseError::NoStationWithinRadius { .. })));
    }

    #[tokio::test]
    async fn test_all_candidates_failing_reports_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let cache = tempfile::tempdir().unwrap();
        let client = client(&server, cache.path()).await;
        let result = client
            .hourly()
            .location(TRAUNKIRCHEN)
            .range(range())
            .station_limit(2)
            .call()
            .await;
        match result {
            Err(WxSenseError::NoDataFoundForNearbyStations {
                stations_tried,
                last_error,
                ..
            }) => {
                assert_eq!(stations_tried, 2);
                assert!(last_error.is_some());
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_meteo_provider() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hourly": {
                    "time": ["2024-10-31T00:00", "2024-10-31T01:00"],
                    "temperature_2m": [5.0, 4.8],
                    "relative_humidity_2m": [90.0, 91.0],
                    "dew_point_2m": [3.5, 3.4],
                    "precipitation": [0.0, 0.0],
                    "pressure_msl": [1020.0, 1019.5],
                    "cloud_cover": [25.0, null],
                    "wind_speed_10m": [4.0, 5.0],
                    "wind_direction_10m": [180.0, 190.0],
                    "sunshine_duration": [0.0, 0.0]
                }
            })))
            .mount(&server)
            .await;
        let cache = tempfile::tempdir().unwrap();
        let client = client(&server, cache.path()).await;
        let frame = client
            .hourly()
            .location(TRAUNKIRCHEN)
            .range(range())
            .provider(WeatherProvider::OpenMeteo)
            .call()
            .await
            .unwrap();
        assert_eq!(frame.height(), 2);
        let records = frame.records().unwrap();
        assert_eq!(records[0].cloud_cover_proxy, Some(0.25));
        assert_eq!(records[1].cloud_cover_proxy, None);
        assert_eq!(frame.source, WeatherSource::OpenMeteo { location: TRAUNKIRCHEN });
    }

    #[tokio::test]
    async fn test_find_stations_filters_by_inventory() {
        let server = MockServer::start().await;
        let cache = tempfile::tempdir().unwrap();
        let client = client(&server, cache.path()).await;
        let later = QueryRange::single_day(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap());
        let stations = client
            .find_stations()
            .location(TRAUNKIRCHEN)
            .range(later)
            .max_distance_km(100.0)
            .call()
            .await
            .unwrap();
        assert!(stations.iter().all(|(s, _)| s.id != "11010"));
        assert!(stations.iter().any(|(s, _)| s.id == "11155"));
    }
}
