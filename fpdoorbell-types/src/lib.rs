//! Type definitions for fpdoorbell

pub mod error;
pub mod name;
pub mod outcome;
pub mod sensor_info;

pub use error::{Error, Result};
pub use name::{normalize_name, MAX_NAME_LEN};
pub use outcome::{Match, ScanOutcome};
pub use sensor_info::{SensorInfo, StatusFlags};
