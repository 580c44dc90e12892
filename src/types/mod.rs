pub mod lat_lon;
pub mod query_range;
pub mod station;
