//! Unified error handling for track session operations.
//!
//! Every fallible operation in the crate returns [`Result`], so callers can
//! match on the specific [`TrackError`] variant they know how to recover from.

use thiserror::Error;

use crate::types::TrackId;

/// Unified error type for track and measurement operations.
#[derive(Debug, Error)]
pub enum TrackError {
    /// Append attempted on a finished track without override.
    #[error("Track {track_id} is already finished")]
    TrackAlreadyFinished { track_id: TrackId },

    /// Measurement properties could not be encoded or decoded.
    #[error("Property serialization failed: {0}")]
    Serialization(String),

    /// A boundary query ran against a track without readings.
    #[error("Track {track_id} has no measurements")]
    NoMeasurements { track_id: TrackId },

    /// No track row with this id.
    #[error("Track {track_id} not found")]
    TrackNotFound { track_id: TrackId },

    /// A finished track may not be persisted as active again.
    #[error("Track {track_id} is finished and cannot be reactivated")]
    InvalidStatusTransition { track_id: TrackId },

    /// The database was written by a newer schema than this build knows.
    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i32, supported: i32 },

    /// Generic storage failure from SQLite.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The session lock was poisoned by a panicking holder.
    #[error("Session lock poisoned")]
    LockPoisoned,
}

impl From<serde_json::Error> for TrackError {
    fn from(e: serde_json::Error) -> Self {
        TrackError::Serialization(e.to_string())
    }
}

/// Result type alias for track session operations.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Extension trait for converting Option to TrackError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a track-not-found error.
    fn ok_or_not_found(self, track_id: TrackId) -> Result<T>;

    /// Convert Option to Result with a no-measurements error.
    fn ok_or_no_measurements(self, track_id: TrackId) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, track_id: TrackId) -> Result<T> {
        self.ok_or(TrackError::TrackNotFound { track_id })
    }

    fn ok_or_no_measurements(self, track_id: TrackId) -> Result<T> {
        self.ok_or(TrackError::NoMeasurements { track_id })
    }
}
