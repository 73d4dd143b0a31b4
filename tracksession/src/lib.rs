//! Tracksession - persistent vehicle telemetry tracks
//!
//! This crate provides:
//! - A compact JSON codec for per-reading sensor properties
//! - SQLite persistence for tracks and their measurements
//! - Continuity decisions that group readings into driving sessions
//! - A session manager tying the above together behind one lock

pub mod clock;
pub mod config;
pub mod continuity;
pub mod error;
pub mod geo_utils;
pub mod measurements;
pub mod properties;
pub mod schema;
pub mod session;
pub mod store;
pub mod tracks;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SessionConfig, TrackLabels};
pub use continuity::{Continuity, ContinuityResolver, NewTrackReason};
pub use error::{OptionExt, Result, TrackError};
pub use properties::{DecodedProperties, PropertyKey, PropertyMap};
pub use session::{AppendOutcome, CarProvider, FinishOutcome, NoCar, SessionCache, SessionManager};
pub use store::TrackDatabase;
pub use types::{
    CarProfile, FuelType, Measurement, MeasurementId, NewMeasurement, NewTrack, Position, Track,
    TrackBounds, TrackFilter, TrackId, TrackMeasurements, TrackMetadata, TrackStatus,
};

/// Initialize logging for Android
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("tracksession"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms
}
