//! Parsing of logger exports holding the IR20 longwave radiation channel.

pub mod error;
pub mod options;
pub mod parser;
pub mod table;

pub use error::SensorError;
pub use options::SensorOptions;
pub use parser::{parse_sensor_file, read_sensor_file};
pub use table::{SensorRecord, SensorTable};
