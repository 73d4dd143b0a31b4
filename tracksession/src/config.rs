//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::CarProfile;

/// Default maximum gap between two readings of one track (15 minutes).
pub const DEFAULT_MAX_TIME_GAP_MS: i64 = 15 * 60 * 1000;

/// Default maximum jump between two readings of one track.
pub const DEFAULT_MAX_DISTANCE_GAP_KM: f64 = 3.0;

/// The cached active track is trusted for `max_time_gap / divisor`.
pub const DEFAULT_STALE_WINDOW_DIVISOR: i64 = 10;

/// Tuning for continuity decisions and new-track labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// A reading later than this after the track's last one starts a new track
    pub max_time_gap_ms: i64,
    /// A reading further than this from the track's last one starts a new track
    pub max_distance_gap_km: f64,
    pub stale_window_divisor: i64,
    pub labels: TrackLabels,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_time_gap_ms: DEFAULT_MAX_TIME_GAP_MS,
            max_distance_gap_km: DEFAULT_MAX_DISTANCE_GAP_KM,
            stale_window_divisor: DEFAULT_STALE_WINDOW_DIVISOR,
            labels: TrackLabels::default(),
        }
    }
}

impl SessionConfig {
    /// Window during which the cached active track is reused without storage checks.
    pub fn stale_window_ms(&self) -> i64 {
        self.max_time_gap_ms / self.stale_window_divisor.max(1)
    }

    /// Load from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Templates used to label tracks created by the session manager.
///
/// `{date}` is replaced with the creation time, `{model}` with the car model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackLabels {
    pub name_template: String,
    pub description_template: String,
}

impl Default for TrackLabels {
    fn default() -> Self {
        Self {
            name_template: "Track {date}".to_string(),
            description_template: "Track with the car {model}".to_string(),
        }
    }
}

impl TrackLabels {
    pub fn track_name(&self, now_millis: i64) -> String {
        let date = chrono::DateTime::from_timestamp_millis(now_millis)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| now_millis.to_string());
        self.name_template.replace("{date}", &date)
    }

    pub fn track_description(&self, car: Option<&CarProfile>) -> String {
        let model = car.map(|c| c.model.as_str()).unwrap_or("unknown car");
        self.description_template.replace("{model}", model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FuelType;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_time_gap_ms, 900_000);
        assert_eq!(config.max_distance_gap_km, 3.0);
        assert_eq!(config.stale_window_ms(), 90_000);
    }

    #[test]
    fn test_zero_divisor_does_not_panic() {
        let config = SessionConfig {
            stale_window_divisor: 0,
            ..SessionConfig::default()
        };
        assert_eq!(config.stale_window_ms(), config.max_time_gap_ms);
    }

    #[test]
    fn test_from_json_partial() {
        let config = SessionConfig::from_json(r#"{"maxDistanceGapKm": 1.5}"#).unwrap();
        assert_eq!(config.max_distance_gap_km, 1.5);
        assert_eq!(config.max_time_gap_ms, DEFAULT_MAX_TIME_GAP_MS);
        assert_eq!(config.labels, TrackLabels::default());

        assert!(SessionConfig::from_json("[]").is_err());
    }

    #[test]
    fn test_labels() {
        let labels = TrackLabels::default();
        // 2024-03-01T08:30:00Z
        assert_eq!(labels.track_name(1_709_281_800_000), "Track 2024-03-01 08:30:00");

        let car = CarProfile {
            id: None,
            manufacturer: "Ford".to_string(),
            model: "Focus".to_string(),
            fuel_type: FuelType::Gasoline,
            construction_year: 2015,
            engine_displacement_cc: 1596,
        };
        assert_eq!(labels.track_description(Some(&car)), "Track with the car Focus");
        assert_eq!(labels.track_description(None), "Track with the car unknown car");
    }
}
