//! Continuity decisions: does a new reading extend the last track or start a new one?
//!
//! The resolver only decides. Creating the new track is left to the session
//! manager, and it never finishes or deletes the track it passes over.

use log::{debug, info};

use crate::config::SessionConfig;
use crate::geo_utils::haversine_km;
use crate::types::{Position, Track, TrackId};

/// Why a new track has to be started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NewTrackReason {
    /// There is no track at all
    NoPreviousTrack,
    /// The last track has no readings
    EmptyTrack,
    /// The last track is finished (or remote)
    Finished,
    /// The last reading is older than the maximum time gap
    TimedOut { gap_ms: i64 },
    /// The reading has no position to compare
    NoPosition,
    /// The reading is further than the maximum distance gap
    TooFar { distance_km: f64 },
}

/// Outcome of a continuity check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Continuity {
    Reuse(TrackId),
    CreateNew(NewTrackReason),
}

/// Decides track continuity from time and distance gaps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuityResolver {
    max_time_gap_ms: i64,
    max_distance_gap_km: f64,
    stale_window_ms: i64,
}

impl ContinuityResolver {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            max_time_gap_ms: config.max_time_gap_ms,
            max_distance_gap_km: config.max_distance_gap_km,
            stale_window_ms: config.stale_window_ms(),
        }
    }

    /// Fast path: trust the cached active track if it was last touched recently enough.
    pub fn cached(
        &self,
        active_track: Option<TrackId>,
        last_append_ms: Option<i64>,
        now_ms: i64,
    ) -> Option<TrackId> {
        let (track_id, last) = (active_track?, last_append_ms?);
        if now_ms.saturating_sub(last) < self.stale_window_ms {
            debug!("[Continuity] Reusing cached active track {}", track_id);
            Some(track_id)
        } else {
            None
        }
    }

    /// Slow path: compare the reading against the last used track's last reading.
    ///
    /// `last_used` may be lazily loaded; only its last reading is consulted.
    /// A last reading stamped further in the future than the time gap counts
    /// as timed out too.
    pub fn decide(
        &self,
        last_used: Option<&Track>,
        position: Option<&Position>,
        now_ms: i64,
    ) -> Continuity {
        let Some(track) = last_used else {
            info!("[Continuity] No previous track, starting a new one");
            return Continuity::CreateNew(NewTrackReason::NoPreviousTrack);
        };

        if track.is_finished() {
            info!("[Continuity] Track {} is finished, starting a new one", track.id());
            return Continuity::CreateNew(NewTrackReason::Finished);
        }

        let Some(last) = track.measurements().last() else {
            // Cleanup of the empty track is owned by finish_active, not by this check
            info!(
                "[Continuity] Track {} has no measurements, starting a new one",
                track.id()
            );
            return Continuity::CreateNew(NewTrackReason::EmptyTrack);
        };

        // Reading times come from the device and may be arbitrarily far off
        let gap_ms = now_ms.saturating_sub(last.time);
        if gap_ms.saturating_abs() > self.max_time_gap_ms {
            info!(
                "[Continuity] Last measurement of track {} is more than {} min ago",
                track.id(),
                self.max_time_gap_ms / 60_000
            );
            return Continuity::CreateNew(NewTrackReason::TimedOut { gap_ms });
        }

        let Some(position) = position else {
            info!("[Continuity] Reading has no position, starting a new track");
            return Continuity::CreateNew(NewTrackReason::NoPosition);
        };

        let distance_km = haversine_km(&last.position, position);
        if distance_km > self.max_distance_gap_km {
            info!(
                "[Continuity] Reading is {:.2} km from track {}, more than {} km",
                distance_km,
                track.id(),
                self.max_distance_gap_km
            );
            return Continuity::CreateNew(NewTrackReason::TooFar { distance_km });
        }

        debug!(
            "[Continuity] Appending to track {}: {} ms and {:.2} km since its last measurement",
            track.id(),
            gap_ms,
            distance_km
        );
        Continuity::Reuse(track.id())
    }
}
