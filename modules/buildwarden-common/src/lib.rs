pub mod config;
pub mod error;
pub mod events;

pub use config::Config;
pub use error::ConfigError;
pub use events::{Event, EventBus};

use chrono::{DateTime, TimeZone, Utc};

/// Convert a Drone epoch-seconds timestamp into a `DateTime<Utc>`.
/// Drone uses `0` for "not set", which maps to `None`.
pub fn utc_from_epoch(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_zero_is_unset() {
        assert_eq!(utc_from_epoch(0), None);
        assert_eq!(utc_from_epoch(-5), None);
    }

    #[test]
    fn epoch_converts() {
        let ts = utc_from_epoch(1_600_000_000).unwrap();
        assert_eq!(ts.timestamp(), 1_600_000_000);
    }
}
