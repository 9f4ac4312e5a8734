pub mod progress;

pub use progress::{SpeedCalculator, format_bytes, format_speed, format_duration, format_timestamp};
