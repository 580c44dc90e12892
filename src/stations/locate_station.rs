use crate::stations::error::LocateStationError;
use crate::types::lat_lon::LatLon;
use crate::types::query_range::QueryRange;
use crate::types::station::Station;
use async_compression::tokio::bufread::GzipDecoder;
use bincode::config::{Configuration, Fixint, LittleEndian};
use futures_util::TryStreamExt;
use haversine::{distance, Location as HaversineLocation, Units};
use log::{debug, info};
use ordered_float::OrderedFloat;
use reqwest::Client;
use rstar::{RTree, AABB};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::path::Path;
use tokio::io::{AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;

const STATIONS_PATH: &str = "stations/lite.json.gz";
const BINCODE_CACHE_FILE_NAME: &str = "stations_lite.bin";
const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();

/// Which hourly inventory a station must advertise to be considered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InventoryFilter {
    /// The station reports hourly data for some period.
    AnyHourly,
    /// The station's hourly inventory encloses the whole range.
    HourlyRange(QueryRange),
}

#[derive(Debug, Clone)]
pub struct StationLocator {
    rtree: RTree<Station>,
}

// Heap entry ordered by distance only
struct StationCandidate<'a> {
    distance_km: OrderedFloat<f64>,
    station: &'a Station,
}
impl PartialEq for StationCandidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.distance_km == other.distance_km
    }
}
impl Eq for StationCandidate<'_> {}
impl PartialOrd for StationCandidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for StationCandidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_km.cmp(&other.distance_km)
    }
}

impl StationLocator {
    /// Loads the station list from the bincode cache in `cache_dir`, or downloads
    /// `{base_url}/stations/lite.json.gz` and caches it when no cache exists yet.
    pub async fn new(
        cache_dir: &Path,
        base_url: &str,
        client: &Client,
    ) -> Result<Self, LocateStationError> {
        let cache_file = cache_dir.join(BINCODE_CACHE_FILE_NAME);

        let stations = if cache_file.exists() {
            let path_clone = cache_file.clone();
            tokio::task::spawn_blocking(move || Self::get_cached_stations(&path_clone)).await??
        } else {
            let url = format!("{}/{}", base_url.trim_end_matches('/'), STATIONS_PATH);
            info!("Station cache not found. Fetching from URL: {}", url);
            let stations = Self::fetch_stations(client, &url).await?;
            Self::cache_stations(stations.clone(), &cache_file).await?;
            stations
        };

        Ok(Self::from_stations(stations))
    }

    /// Builds a locator from an already loaded station list.
    pub fn from_stations(stations: Vec<Station>) -> Self {
        StationLocator {
            rtree: RTree::bulk_load(stations),
        }
    }

    pub fn len(&self) -> usize {
        self.rtree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.rtree.size() == 0
    }

    fn get_cached_stations(cache_path: &Path) -> Result<Vec<Station>, LocateStationError> {
        let bytes = std::fs::read(cache_path)
            .map_err(|e| LocateStationError::CacheRead(cache_path.to_path_buf(), e))?;
        let (decoded_stations, _) =
            bincode::serde::decode_from_slice::<Vec<Station>, _>(&bytes, BINCODE_CONFIG).map_err(
                |e| LocateStationError::CacheDecode(cache_path.to_path_buf(), Box::new(e)),
            )?;
        debug!(
            "Loaded {} stations from {}",
            decoded_stations.len(),
            cache_path.display()
        );
        Ok(decoded_stations)
    }

    async fn fetch_stations(client: &Client, url: &str) -> Result<Vec<Station>, LocateStationError> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| LocateStationError::NetworkRequest(url.to_string(), e))?;
        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                return Err(match e.status() {
                    Some(status) => LocateStationError::HttpStatus {
                        url: url.to_string(),
                        status,
                        source: e,
                    },
                    None => LocateStationError::NetworkRequest(url.to_string(), e),
                });
            }
        };
        let stream = response.bytes_stream().map_err(io::Error::other);
        let stream_reader = StreamReader::new(stream);
        let gzip_decoder = GzipDecoder::new(BufReader::new(stream_reader));
        let mut decoder_reader = BufReader::new(gzip_decoder);
        let mut decompressed_json = Vec::with_capacity(20_000_000);
        decoder_reader.read_to_end(&mut decompressed_json).await?;

        let parse_start = std::time::Instant::now();
        let stations = tokio::task::spawn_blocking(move || {
            serde_json::from_slice::<Vec<Station>>(&decompressed_json)
                .map_err(LocateStationError::from)
        })
        .await??;
        info!(
            "Parsed {} stations from JSON in {:?}",
            stations.len(),
            parse_start.elapsed()
        );
        Ok(stations)
    }

    async fn cache_stations(
        stations: Vec<Station>,
        cache_path: &Path,
    ) -> Result<(), LocateStationError> {
        let bincode_data = tokio::task::spawn_blocking(move || {
            bincode::serde::encode_to_vec(stations, BINCODE_CONFIG)
                .map_err(|e| LocateStationError::CacheEncode(Box::new(e)))
        })
        .await??;
        tokio::fs::write(&cache_path, &bincode_data)
            .await
            .map_err(|e| LocateStationError::CacheWrite(cache_path.to_path_buf(), e))?;
        info!(
            "Wrote station cache ({} bytes) to {}",
            bincode_data.len(),
            cache_path.display()
        );
        Ok(())
    }

    /// Finds up to `n_results` stations within `max_distance_km`, closest first.
    ///
    /// Candidates come from the degree boxes that can hold a station within the
    /// radius (see [`search_envelopes`]); each is checked against the filter and
    /// its haversine distance, and the best ones are kept in a bounded heap.
    pub fn query(
        &self,
        location: LatLon,
        n_results: usize,
        max_distance_km: f64,
        filter: Option<InventoryFilter>,
    ) -> Vec<(Station, f64)> {
        if n_results == 0 || !(max_distance_km >= 0.0) {
            return vec![];
        }
        let mut heap: BinaryHeap<StationCandidate<'_>> = BinaryHeap::with_capacity(n_results);
        let mut checked = 0usize;

        for envelope in search_envelopes(location, max_distance_km) {
            for station in self.rtree.locate_in_envelope(&envelope) {
                checked += 1;
                if filter.is_some_and(|f| !Self::station_meets_criteria(station, f)) {
                    continue;
                }
                let dist_km = haversine_km(location, station);
                if dist_km > max_distance_km {
                    continue;
                }

                let candidate = StationCandidate {
                    distance_km: OrderedFloat(dist_km),
                    station,
                };
                if heap.len() < n_results {
                    heap.push(candidate);
                } else if heap
                    .peek()
                    .is_some_and(|worst| candidate.distance_km < worst.distance_km)
                {
                    heap.pop();
                    heap.push(candidate);
                }
            }
        }
        debug!(
            "Checked {} stations around {}, {} within {} km",
            checked,
            location,
            heap.len(),
            max_distance_km
        );

        heap.into_sorted_vec()
            .into_iter()
            .map(|c| (c.station.to_owned(), c.distance_km.into_inner()))
            .collect()
    }

    fn station_meets_criteria(station: &Station, filter: InventoryFilter) -> bool {
        let hourly = &station.inventory.hourly;
        match filter {
            InventoryFilter::AnyHourly => hourly.start.is_some() && hourly.end.is_some(),
            InventoryFilter::HourlyRange(range) => hourly.covers(range.start(), range.end()),
        }
    }

    /// Looks a station up by name, case-insensitively. An exact match on any
    /// language wins over a substring match; ties go to the lowest station id.
    pub fn find_by_name(&self, name: &str) -> Option<&Station> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        let mut exact: Option<&Station> = None;
        let mut partial: Option<&Station> = None;
        for station in self.rtree.iter() {
            let names = station.name.values().map(|n| n.to_lowercase());
            for candidate in names {
                if candidate == needle {
                    exact = Some(lowest_id(exact, station));
                } else if candidate.contains(&needle) {
                    partial = Some(lowest_id(partial, station));
                }
            }
        }
        exact.or(partial)
    }
}

const EARTH_RADIUS_KM: f64 = 6371.0;
// Widens the boxes slightly so rounding never drops a station on the rim.
const ENVELOPE_MARGIN: f64 = 1.01;

/// Latitude/longitude boxes that together hold every point within
/// `max_distance_km` of `location`.
///
/// The latitude half-width is the meridian arc for the radius. The longitude
/// half-width is bounded through the chord between two points `dlon` apart on
/// the parallel furthest from the equator inside the latitude band, which is
/// never longer than the great-circle distance. Boxes crossing the antimeridian
/// are split in two; bands touching a pole span every longitude.
fn search_envelopes(location: LatLon, max_distance_km: f64) -> Vec<AABB<[f64; 2]>> {
    let dlat = (max_distance_km / EARTH_RADIUS_KM).to_degrees() * ENVELOPE_MARGIN;
    let lat_min = (location.lat() - dlat).max(-90.0);
    let lat_max = (location.lat() + dlat).min(90.0);
    let band = |lon_min: f64, lon_max: f64| AABB::from_corners([lat_min, lon_min], [lat_max, lon_max]);

    let widest_cos = lat_min.abs().max(lat_max.abs()).to_radians().cos();
    let half_chord = max_distance_km / (2.0 * EARTH_RADIUS_KM * widest_cos);
    if !(half_chord < 1.0) {
        return vec![band(-180.0, 180.0)];
    }
    let dlon = (2.0 * half_chord.asin()).to_degrees() * ENVELOPE_MARGIN;
    if dlon >= 180.0 {
        return vec![band(-180.0, 180.0)];
    }

    let (lon_min, lon_max) = (location.lon() - dlon, location.lon() + dlon);
    if lon_min < -180.0 {
        vec![band(-180.0, lon_max), band(lon_min + 360.0, 180.0)]
    } else if lon_max > 180.0 {
        vec![band(lon_min, 180.0), band(-180.0, lon_max - 360.0)]
    } else {
        vec![band(lon_min, lon_max)]
    }
}

fn lowest_id<'a>(current: Option<&'a Station>, station: &'a Station) -> &'a Station {
    match current {
        Some(existing) if existing.id <= station.id => existing,
        _ => station,
    }
}

fn haversine_km(location: LatLon, station: &Station) -> f64 {
    distance(
        HaversineLocation {
            latitude: location.lat(),
            longitude: location.lon(),
        },
        HaversineLocation {
            latitude: station.location.latitude,
            longitude: station.location.longitude,
        },
        Units::Kilometers,
    )
}
