pub mod client;
pub mod error;
pub mod frame;
pub mod meteostat;
pub mod open_meteo;
