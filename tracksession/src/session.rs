//! # Session Manager
//!
//! Orchestrates the stores and the continuity resolver for incoming readings.
//!
//! All state lives behind one mutex: the database connection, the session
//! cache and the configuration. Writers serialize on it, and so do reads,
//! because they share the single connection.
//!
//! ## Append flow
//!
//! 1. Resolve the owning track (cached active track, or a continuity check
//!    against the most recently used track, creating a new track if needed).
//! 2. Refuse the append if the track is finished, unless overridden.
//! 3. Encode and insert the reading, then record the append time.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::continuity::{Continuity, ContinuityResolver};
use crate::error::{OptionExt, Result, TrackError};
use crate::store::TrackDatabase;
use crate::types::{
    CarProfile, MeasurementId, NewMeasurement, NewTrack, Position, Track, TrackFilter, TrackId,
    TrackMetadata, TrackStatus,
};

// ============================================================================
// Collaborators
// ============================================================================

/// Lookup of the car currently selected by the user.
pub trait CarProvider: Send + Sync {
    fn current_car(&self) -> Option<CarProfile>;
}

impl<F> CarProvider for F
where
    F: Fn() -> Option<CarProfile> + Send + Sync,
{
    fn current_car(&self) -> Option<CarProfile> {
        self()
    }
}

/// Provider for setups without car profiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCar;

impl CarProvider for NoCar {
    fn current_car(&self) -> Option<CarProfile> {
        None
    }
}

// ============================================================================
// Types
// ============================================================================

/// Short-lived, process-local session state. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionCache {
    pub active_track_id: Option<TrackId>,
    /// Clock time of the last resolved append
    pub last_append_ms: Option<i64>,
    /// Clock time the active track was last picked by a continuity check
    pub resolved_at_ms: Option<i64>,
    /// Device metadata merged into every resolved track until cleared
    pub pending_device_metadata: Option<TrackMetadata>,
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub track_id: TrackId,
    pub measurement_id: MeasurementId,
    /// Whether resolving the reading started a new track
    pub created_track: bool,
}

/// Result of finishing the active track.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishOutcome {
    /// The track as it was finished. Its id no longer exists when `deleted`.
    pub track: Track,
    /// The track had no readings and was removed instead
    pub deleted: bool,
}

struct SessionInner {
    store: TrackDatabase,
    cache: SessionCache,
    config: SessionConfig,
}

impl SessionInner {
    /// Pick the track for a reading at `position`, creating one if needed.
    fn resolve(
        &mut self,
        position: Option<&Position>,
        now_ms: i64,
        cars: &dyn CarProvider,
    ) -> Result<(TrackId, bool)> {
        let resolver = ContinuityResolver::new(&self.config);

        // A resolution without an append yet keeps the track warm as well
        let last_touched = self.cache.last_append_ms.max(self.cache.resolved_at_ms);
        if let Some(id) = resolver.cached(self.cache.active_track_id, last_touched, now_ms) {
            return Ok((id, false));
        }

        let last_used = self.store.most_recently_used(true)?;
        let (id, created) = match resolver.decide(last_used.as_ref(), position, now_ms) {
            Continuity::Reuse(id) => (id, false),
            Continuity::CreateNew(reason) => {
                debug!("[Session] New track needed: {:?}", reason);
                (self.create_session_track(now_ms, cars)?, true)
            }
        };

        if let Some(pending) = &self.cache.pending_device_metadata {
            self.store.update_metadata(id, pending)?;
        }

        info!("[Session] Active track is now {}", id);
        self.cache.active_track_id = Some(id);
        self.cache.resolved_at_ms = Some(now_ms);

        Ok((id, created))
    }

    fn create_session_track(&mut self, now_ms: i64, cars: &dyn CarProvider) -> Result<TrackId> {
        let car = cars.current_car();
        let labels = &self.config.labels;

        let mut draft = NewTrack::new(labels.track_name(now_ms));
        draft.description = labels.track_description(car.as_ref());
        draft.car = car;
        draft.status = TrackStatus::Active;

        self.store.create_track(&draft, false)
    }

    fn append_guarded(
        &self,
        track_id: TrackId,
        reading: &NewMeasurement,
        override_finished_check: bool,
    ) -> Result<MeasurementId> {
        if !override_finished_check {
            let track = self
                .store
                .get_track(track_id, true)?
                .ok_or_not_found(track_id)?;
            if track.is_finished() {
                return Err(TrackError::TrackAlreadyFinished { track_id });
            }
        }
        self.store.append_measurement(track_id, reading)
    }

    fn clear_active(&mut self) {
        self.cache.active_track_id = None;
        self.cache.last_append_ms = None;
        self.cache.resolved_at_ms = None;
    }
}

// ============================================================================
// Session Manager
// ============================================================================

/// Owner of the active recording session and its backing store.
pub struct SessionManager {
    inner: Mutex<SessionInner>,
    clock: Arc<dyn Clock>,
    cars: Arc<dyn CarProvider>,
}

impl SessionManager {
    pub fn new(
        store: TrackDatabase,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        cars: Arc<dyn CarProvider>,
    ) -> Self {
        crate::init_logging();
        Self {
            inner: Mutex::new(SessionInner {
                store,
                cache: SessionCache::default(),
                config,
            }),
            clock,
            cars,
        }
    }

    /// Manager with default configuration, the system clock and no car lookup.
    pub fn with_defaults(store: TrackDatabase) -> Self {
        Self::new(
            store,
            SessionConfig::default(),
            Arc::new(SystemClock),
            Arc::new(NoCar),
        )
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionInner>> {
        self.inner.lock().map_err(|_| TrackError::LockPoisoned)
    }

    // ========================================================================
    // Appending
    // ========================================================================

    /// Append a reading to the track the continuity check resolves for it.
    pub fn append_reading(
        &self,
        reading: NewMeasurement,
        override_finished_check: bool,
    ) -> Result<AppendOutcome> {
        let mut inner = self.lock()?;
        let now = self.clock.now_millis();

        let (track_id, created_track) =
            inner.resolve(Some(&reading.position), now, self.cars.as_ref())?;
        let measurement_id = inner.append_guarded(track_id, &reading, override_finished_check)?;
        inner.cache.last_append_ms = Some(now);

        Ok(AppendOutcome {
            track_id,
            measurement_id,
            created_track,
        })
    }

    /// Append a reading to a caller-chosen track. The session cache is left alone.
    pub fn append_to_track(
        &self,
        track_id: TrackId,
        reading: NewMeasurement,
        override_finished_check: bool,
    ) -> Result<MeasurementId> {
        let inner = self.lock()?;
        inner.append_guarded(track_id, &reading, override_finished_check)
    }

    /// Resolve (and cache) the active track for a position without appending.
    ///
    /// Appends within the stale window that follows go to the same track.
    pub fn resolve_active_track(&self, position: Option<Position>) -> Result<TrackId> {
        let mut inner = self.lock()?;
        let now = self.clock.now_millis();
        let (id, _) = inner.resolve(position.as_ref(), now, self.cars.as_ref())?;
        Ok(id)
    }

    // ========================================================================
    // Finishing and metadata
    // ========================================================================

    /// Finish the most recently used track.
    ///
    /// A track without readings is deleted instead. The cached active track is
    /// cleared in every case.
    pub fn finish_active(&self) -> Result<Option<FinishOutcome>> {
        let mut inner = self.lock()?;

        let Some(mut track) = inner.store.most_recently_used(false)? else {
            inner.clear_active();
            return Ok(None);
        };
        let id = track.id();

        let has_measurements = match track.last_measurement() {
            Ok(_) => true,
            Err(TrackError::NoMeasurements { .. }) => false,
            Err(e) => return Err(e),
        };

        let deleted = if !has_measurements {
            inner.store.delete_track(id)?;
            info!("[Session] Track {} had no measurements and was deleted", id);
            true
        } else {
            track.finish();
            inner.store.update_track(&track)?;
            info!("[Session] Finished track {}", id);
            false
        };

        match inner.cache.active_track_id {
            Some(active) if active == id => {
                info!("[Session] Removing active track reference {}", active)
            }
            active => warn!(
                "[Session] Finished track did not match the active track reference. Finished: {} vs. active: {:?}",
                id, active
            ),
        }
        inner.clear_active();

        Ok(Some(FinishOutcome { track, deleted }))
    }

    /// Remember device metadata and merge it into the active track, if any.
    ///
    /// Remembered metadata accumulates and is merged into every track the
    /// session resolves until [`Self::clear_device_metadata`] is called.
    pub fn merge_device_metadata(&self, metadata: TrackMetadata) -> Result<()> {
        let mut inner = self.lock()?;

        if let Some(active) = inner.cache.active_track_id {
            inner.store.update_metadata(active, &metadata)?;
            debug!("[Session] Merged device metadata into track {}", active);
        }
        inner
            .cache
            .pending_device_metadata
            .get_or_insert_with(TrackMetadata::new)
            .merge(&metadata);
        Ok(())
    }

    pub fn clear_device_metadata(&self) -> Result<()> {
        self.lock()?.cache.pending_device_metadata = None;
        Ok(())
    }

    // ========================================================================
    // Configuration and cache
    // ========================================================================

    pub fn set_max_time_gap(&self, millis: i64) -> Result<()> {
        self.lock()?.config.max_time_gap_ms = millis;
        Ok(())
    }

    pub fn set_max_distance_gap(&self, km: f64) -> Result<()> {
        self.lock()?.config.max_distance_gap_km = km;
        Ok(())
    }

    pub fn config(&self) -> Result<SessionConfig> {
        Ok(self.lock()?.config.clone())
    }

    pub fn active_track_id(&self) -> Result<Option<TrackId>> {
        Ok(self.lock()?.cache.active_track_id)
    }

    pub fn cache(&self) -> Result<SessionCache> {
        Ok(self.lock()?.cache.clone())
    }

    // ========================================================================
    // Track store boundary
    // ========================================================================

    /// Persist a complete track (e.g. an import). See [`TrackDatabase::create_track`].
    pub fn create_track(&self, track: &NewTrack, skip_finished_check: bool) -> Result<TrackId> {
        self.lock()?.store.create_track(track, skip_finished_check)
    }

    pub fn update_track(&self, track: &Track) -> Result<bool> {
        self.lock()?.store.update_track(track)
    }

    pub fn get_track(&self, id: TrackId, lazy: bool) -> Result<Option<Track>> {
        self.lock()?.store.get_track(id, lazy)
    }

    pub fn has_track(&self, id: TrackId) -> Result<bool> {
        self.lock()?.store.has_track(id)
    }

    pub fn load_measurements(&self, track: &mut Track) -> Result<()> {
        self.lock()?.store.load_measurements(track)
    }

    pub fn list_tracks(&self, filter: TrackFilter, lazy: bool) -> Result<Vec<Track>> {
        self.lock()?.store.list_tracks(filter, lazy)
    }

    pub fn most_recently_used(&self, lazy: bool) -> Result<Option<Track>> {
        self.lock()?.store.most_recently_used(lazy)
    }

    pub fn count_tracks(&self) -> Result<u64> {
        self.lock()?.store.count_tracks()
    }

    pub fn count_remote_tracks(&self) -> Result<u64> {
        self.lock()?.store.count_remote_tracks()
    }

    /// Delete a track. Deleting the active track also clears the session cache.
    pub fn delete_track(&self, id: TrackId) -> Result<bool> {
        let mut inner = self.lock()?;
        let removed = inner.store.delete_track(id)?;
        if inner.cache.active_track_id == Some(id) {
            inner.clear_active();
        }
        Ok(removed)
    }

    pub fn delete_all_tracks(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.store.delete_all_tracks()?;
        inner.clear_active();
        Ok(())
    }

    pub fn delete_all_remote_tracks(&self) -> Result<usize> {
        self.lock()?.store.delete_all_remote_tracks()
    }

    pub fn update_track_metadata(
        &self,
        id: TrackId,
        metadata: &TrackMetadata,
    ) -> Result<TrackMetadata> {
        self.lock()?.store.update_metadata(id, metadata)
    }

    pub fn mark_remote(&self, id: TrackId, remote_id: &str) -> Result<bool> {
        self.lock()?.store.mark_remote(id, remote_id)
    }

    pub fn update_car_reference(&self, old_car_id: &str, new_car_id: &str) -> Result<usize> {
        self.lock()?.store.update_car_reference(old_car_id, new_car_id)
    }
}
