//! Pressure differences between valley sites, with cloud and wind context of a
//! reference site. A large enough difference hints at a southerly foehn wind
//! ("Oberwind") on the lake.

use crate::error::WxSenseError;
use crate::types::lat_lon::LatLon;
use crate::types::query_range::QueryRange;
use crate::utils::DATETIME;
use crate::weather::open_meteo::OpenMeteoClient;
use chrono::NaiveDate;
use log::info;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const GRADIENT_VARIABLES: [&str; 7] = [
    "pressure_msl",
    "cloud_cover",
    "cloud_cover_low",
    "cloud_cover_mid",
    "cloud_cover_high",
    "wind_speed_10m",
    "wind_direction_10m",
];

/// Total cloud cover of the reference site in okta/2 (0 clear, 4 overcast).
pub const CLOUD_TOTAL: &str = "cloud_total";
pub const CLOUD_LOW: &str = "cloud_low";
pub const CLOUD_MID: &str = "cloud_mid";
pub const CLOUD_HIGH: &str = "cloud_high";
pub const WIND_SPEED: &str = "wind_speed";
pub const WIND_DIR: &str = "wind_dir";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientSettings {
    pub sites: BTreeMap<String, LatLon>,
    /// `(a, b)` pairs; each yields the difference `p_a - p_b` in hPa.
    pub pairs: Vec<(String, String)>,
    pub reference_site: String,
    pub threshold_hpa: f64,
    pub threshold_label: String,
    /// Local zone the hourly timestamps are expressed in.
    pub timezone: String,
}

impl Default for GradientSettings {
    fn default() -> Self {
        let site = |name: &str, lat: f64, lon: f64| (name.to_string(), LatLon(lat, lon));
        Self {
            sites: BTreeMap::from([
                site("Traunkirchen", 47.993, 13.745),
                site("Gmunden", 47.918, 13.799),
                site("Bad_Ischl", 47.714, 13.632),
                site("Ried", 48.198, 13.490),
            ]),
            pairs: vec![
                ("Traunkirchen".to_string(), "Gmunden".to_string()),
                ("Bad_Ischl".to_string(), "Ried".to_string()),
            ],
            reference_site: "Traunkirchen".to_string(),
            threshold_hpa: 1.5,
            threshold_label: "Oberwind – Süd".to_string(),
            timezone: "Europe/Vienna".to_string(),
        }
    }
}

impl GradientSettings {
    /// The reference site followed by every other site a pair mentions.
    pub fn required_sites(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        std::iter::once(&self.reference_site)
            .chain(self.pairs.iter().flat_map(|(a, b)| [a, b]))
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }

    fn location(&self, site: &str) -> Result<LatLon, WxSenseError> {
        self.sites
            .get(site)
            .copied()
            .ok_or_else(|| WxSenseError::UnknownSite(site.to_string()))
    }
}

pub fn pressure_column(site: &str) -> String {
    format!("p_{}", site)
}

pub fn delta_column(a: &str, b: &str) -> String {
    format!("dP_{}_{}", a, b)
}

#[derive(Debug, Clone)]
pub struct GradientFrame {
    pub frame: DataFrame,
    pub range: QueryRange,
    pub settings: GradientSettings,
}

impl GradientFrame {
    pub fn delta_columns(&self) -> Vec<String> {
        self.settings
            .pairs
            .iter()
            .map(|(a, b)| delta_column(a, b))
            .collect()
    }

    /// Hours in which any pair difference reaches the threshold.
    pub fn hours_above_threshold(&self) -> PolarsResult<usize> {
        let threshold = self.settings.threshold_hpa;
        let any_above = self
            .delta_columns()
            .iter()
            .map(|name| col(name.as_str()).gt_eq(lit(threshold)))
            .reduce(|acc, e| acc.or(e));
        let Some(any_above) = any_above else {
            return Ok(0);
        };
        let df = self
            .frame
            .clone()
            .lazy()
            .filter(any_above)
            .collect()?;
        Ok(df.height())
    }
}

/// Fetches every required site from Open-Meteo for the whole days
/// `start..=end` and assembles the gradient table.
///
/// # Errors
///
/// [`WxSenseError::InvalidDateRange`] when `end` is before `start`,
/// [`WxSenseError::UnknownSite`] when a pair names a site without coordinates.
pub async fn compute(
    client: &OpenMeteoClient,
    start: NaiveDate,
    end: NaiveDate,
    settings: &GradientSettings,
) -> Result<GradientFrame, WxSenseError> {
    let range = QueryRange::new(start, end)?;
    let mut site_frames = BTreeMap::new();
    for site in settings.required_sites() {
        let location = settings.location(&site)?;
        info!("Fetching pressure and cloud data for {} ({})", site, location);
        let df = client
            .fetch_variables(location, start, end, &GRADIENT_VARIABLES, &settings.timezone)
            .await?;
        site_frames.insert(site, df);
    }
    assemble(&site_frames, range, settings)
}

/// Builds the gradient table from one Open-Meteo frame per site. Rows are
/// matched on `datetime`; hours missing at any site are left out.
pub fn assemble(
    site_frames: &BTreeMap<String, DataFrame>,
    range: QueryRange,
    settings: &GradientSettings,
) -> Result<GradientFrame, WxSenseError> {
    let frame_of = |site: &str| {
        site_frames
            .get(site)
            .ok_or_else(|| WxSenseError::UnknownSite(site.to_string()))
    };

    let reference = &settings.reference_site;
    let mut lazy = frame_of(reference)?.clone().lazy().select([
        col(DATETIME),
        col("pressure_msl").alias(pressure_column(reference).as_str()),
        (col("cloud_cover") / lit(100.0) * lit(4.0)).alias(CLOUD_TOTAL),
        col("cloud_cover_low").alias(CLOUD_LOW),
        col("cloud_cover_mid").alias(CLOUD_MID),
        col("cloud_cover_high").alias(CLOUD_HIGH),
        col("wind_speed_10m").alias(WIND_SPEED),
        col("wind_direction_10m").alias(WIND_DIR),
    ]);

    for site in settings.required_sites().iter().skip(1) {
        let pressure = frame_of(site)?
            .clone()
            .lazy()
            .select([col(DATETIME), col("pressure_msl").alias(pressure_column(site).as_str())]);
        lazy = lazy.join(
            pressure,
            [col(DATETIME)],
            [col(DATETIME)],
            JoinArgs::new(JoinType::Inner),
        );
    }

    let deltas: Vec<Expr> = settings
        .pairs
        .iter()
        .map(|(a, b)| {
            (col(pressure_column(a).as_str()) - col(pressure_column(b).as_str()))
                .alias(delta_column(a, b).as_str())
        })
        .collect();
    let frame = lazy
        .with_columns(deltas)
        .sort([DATETIME], Default::default())
        .collect()?;

    Ok(GradientFrame {
        frame,
        range,
        settings: settings.clone(),
    })
}
