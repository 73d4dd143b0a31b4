//! Core data types for tracks and measurements.
//!
//! These are plain data containers shared by the stores, the continuity
//! resolver and the session manager.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OptionExt, Result};
use crate::properties::{PropertyKey, PropertyMap};

// ============================================================================
// Identifiers
// ============================================================================

/// Stable track identity, assigned by the store on first persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub i64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row identity of a stored measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementId(pub i64);

// ============================================================================
// Position
// ============================================================================

/// A GPS coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

// ============================================================================
// Status and car profile
// ============================================================================

/// Track lifecycle. Moves only from `Active` to `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrackStatus {
    Active,
    Finished,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Active => "ACTIVE",
            TrackStatus::Finished => "FINISHED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(TrackStatus::Active),
            "FINISHED" => Some(TrackStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FuelType {
    Gasoline,
    Diesel,
    Gas,
    Hybrid,
    Electric,
}

impl FuelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::Gasoline => "GASOLINE",
            FuelType::Diesel => "DIESEL",
            FuelType::Gas => "GAS",
            FuelType::Hybrid => "HYBRID",
            FuelType::Electric => "ELECTRIC",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GASOLINE" => Some(FuelType::Gasoline),
            "DIESEL" => Some(FuelType::Diesel),
            "GAS" => Some(FuelType::Gas),
            "HYBRID" => Some(FuelType::Hybrid),
            "ELECTRIC" => Some(FuelType::Electric),
            _ => None,
        }
    }
}

/// Snapshot of the car a track was recorded with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarProfile {
    /// Upstream car profile id (not required for the snapshot to be usable)
    pub id: Option<String>,
    pub manufacturer: String,
    pub model: String,
    pub fuel_type: FuelType,
    pub construction_year: i32,
    pub engine_displacement_cc: i32,
}

// ============================================================================
// Metadata
// ============================================================================

/// Open key/value document attached to a track, merged incrementally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackMetadata(BTreeMap<String, String>);

impl TrackMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Merge `other` into this document. Keys in `other` win.
    pub fn merge(&mut self, other: &TrackMetadata) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Measurements
// ============================================================================

/// A stored reading. Immutable once inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub id: MeasurementId,
    pub track_id: TrackId,
    /// Epoch milliseconds
    pub time: i64,
    pub position: Position,
    pub properties: PropertyMap,
}

impl Measurement {
    pub fn property(&self, key: PropertyKey) -> Option<f64> {
        self.properties.get(&key).copied()
    }
}

/// A reading that has not been assigned to a track yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMeasurement {
    /// Epoch milliseconds
    pub time: i64,
    pub position: Position,
    pub properties: PropertyMap,
}

impl NewMeasurement {
    pub fn new(time: i64, position: Position) -> Self {
        Self {
            time,
            position,
            properties: PropertyMap::new(),
        }
    }

    pub fn with_property(mut self, key: PropertyKey, value: f64) -> Self {
        self.properties.insert(key, value);
        self
    }
}

/// First and last reading of a track, by time.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackBounds {
    pub first: Measurement,
    pub last: Measurement,
}

/// How much of a track's measurement sequence has been loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackMeasurements {
    /// Lazily loaded: only the boundary readings (None for an empty track).
    Summary(Option<TrackBounds>),
    /// Eagerly loaded, ordered by time ascending.
    Full(Vec<Measurement>),
}

impl TrackMeasurements {
    pub fn is_lazy(&self) -> bool {
        matches!(self, TrackMeasurements::Summary(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TrackMeasurements::Summary(bounds) => bounds.is_none(),
            TrackMeasurements::Full(all) => all.is_empty(),
        }
    }

    pub fn first(&self) -> Option<&Measurement> {
        match self {
            TrackMeasurements::Summary(bounds) => bounds.as_ref().map(|b| &b.first),
            TrackMeasurements::Full(all) => all.first(),
        }
    }

    pub fn last(&self) -> Option<&Measurement> {
        match self {
            TrackMeasurements::Summary(bounds) => bounds.as_ref().map(|b| &b.last),
            TrackMeasurements::Full(all) => all.last(),
        }
    }

    /// The full sequence, if it has been loaded.
    pub fn loaded(&self) -> Option<&[Measurement]> {
        match self {
            TrackMeasurements::Summary(_) => None,
            TrackMeasurements::Full(all) => Some(all),
        }
    }
}

// ============================================================================
// Tracks
// ============================================================================

/// Everything needed to persist a new track.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrack {
    pub name: String,
    pub description: String,
    pub remote_id: Option<String>,
    pub status: TrackStatus,
    pub car: Option<CarProfile>,
    pub metadata: TrackMetadata,
    /// Readings to import together with the track
    pub measurements: Vec<NewMeasurement>,
}

impl NewTrack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            remote_id: None,
            status: TrackStatus::Active,
            car: None,
            metadata: TrackMetadata::new(),
            measurements: Vec::new(),
        }
    }
}

/// One recorded driving session.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: TrackId,
    pub name: String,
    pub description: String,
    pub remote_id: Option<String>,
    status: TrackStatus,
    pub car: Option<CarProfile>,
    pub metadata: TrackMetadata,
    measurements: TrackMeasurements,
}

impl Track {
    /// Assemble a track from its stored row. `row.measurements` is ignored.
    pub(crate) fn from_row(id: TrackId, row: NewTrack, measurements: TrackMeasurements) -> Self {
        Self {
            id,
            name: row.name,
            description: row.description,
            remote_id: row.remote_id,
            status: row.status,
            car: row.car,
            metadata: row.metadata,
            measurements,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    /// The stored status, without the remote override.
    pub fn status(&self) -> TrackStatus {
        self.status
    }

    /// Remote tracks are always treated as finished.
    pub fn effective_status(&self) -> TrackStatus {
        if self.is_remote() {
            TrackStatus::Finished
        } else {
            self.status
        }
    }

    pub fn is_finished(&self) -> bool {
        self.effective_status() == TrackStatus::Finished
    }

    pub fn is_remote(&self) -> bool {
        self.remote_id.is_some()
    }

    pub fn finish(&mut self) {
        self.status = TrackStatus::Finished;
    }

    pub fn measurements(&self) -> &TrackMeasurements {
        &self.measurements
    }

    pub(crate) fn set_measurements(&mut self, measurements: Vec<Measurement>) {
        self.measurements = TrackMeasurements::Full(measurements);
    }

    pub fn is_lazy(&self) -> bool {
        self.measurements.is_lazy()
    }

    pub fn last_measurement(&self) -> Result<&Measurement> {
        self.measurements.last().ok_or_no_measurements(self.id)
    }

    pub fn first_measurement(&self) -> Result<&Measurement> {
        self.measurements.first().ok_or_no_measurements(self.id)
    }

    pub fn start_time(&self) -> Option<i64> {
        self.measurements.first().map(|m| m.time)
    }

    pub fn end_time(&self) -> Option<i64> {
        self.measurements.last().map(|m| m.time)
    }
}

/// Filter for track enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFilter {
    All,
    /// Tracks without a remote id
    Local,
    /// Tracks linked to a remote copy
    Remote,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackError;

    fn measurement(time: i64) -> Measurement {
        Measurement {
            id: MeasurementId(time),
            track_id: TrackId(1),
            time,
            position: Position::new(52.0, 7.0),
            properties: PropertyMap::new(),
        }
    }

    fn track(remote_id: Option<&str>, measurements: TrackMeasurements) -> Track {
        let mut row = NewTrack::new("test");
        row.remote_id = remote_id.map(str::to_string);
        Track::from_row(TrackId(1), row, measurements)
    }

    #[test]
    fn test_status_names() {
        for status in [TrackStatus::Active, TrackStatus::Finished] {
            assert_eq!(TrackStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TrackStatus::from_str("ONGOING"), None);
        assert_eq!(FuelType::from_str("DIESEL"), Some(FuelType::Diesel));
        assert_eq!(FuelType::from_str("diesel"), None);
    }

    #[test]
    fn test_remote_track_is_always_finished() {
        let local = track(None, TrackMeasurements::Full(vec![]));
        assert_eq!(local.effective_status(), TrackStatus::Active);
        assert!(!local.is_finished());

        let remote = track(Some("abc"), TrackMeasurements::Full(vec![]));
        assert_eq!(remote.status(), TrackStatus::Active);
        assert_eq!(remote.effective_status(), TrackStatus::Finished);
        assert!(remote.is_finished());
    }

    #[test]
    fn test_summary_bounds() {
        let t = track(
            None,
            TrackMeasurements::Summary(Some(TrackBounds {
                first: measurement(100),
                last: measurement(900),
            })),
        );
        assert!(t.is_lazy());
        assert_eq!(t.start_time(), Some(100));
        assert_eq!(t.end_time(), Some(900));
        assert_eq!(t.last_measurement().unwrap().time, 900);
        assert!(t.measurements().loaded().is_none());
    }

    #[test]
    fn test_empty_track_has_no_last_measurement() {
        let t = track(None, TrackMeasurements::Summary(None));
        assert!(t.measurements().is_empty());
        assert!(matches!(
            t.last_measurement(),
            Err(TrackError::NoMeasurements { track_id: TrackId(1) })
        ));
        assert_eq!(t.start_time(), None);
    }

    #[test]
    fn test_metadata_merge() {
        let mut base = TrackMetadata::new()
            .with("device", "OBD-I")
            .with("app", "1.0");
        let update = TrackMetadata::new().with("device", "OBD-II");

        base.merge(&update);
        assert_eq!(base.get("device"), Some("OBD-II"));
        assert_eq!(base.get("app"), Some("1.0"));
        assert_eq!(base.len(), 2);

        let json = base.to_json().unwrap();
        assert_eq!(TrackMetadata::from_json(&json).unwrap(), base);
    }
}
