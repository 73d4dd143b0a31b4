//! Track store: CRUD over track rows.
//!
//! Car snapshots are spread over dedicated columns and metadata is stored as a
//! JSON document. Measurements are deleted with their track by filtering on
//! `track_id`; there is no foreign key.

use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{OptionExt, Result, TrackError};
use crate::measurements::{delete_measurements, insert_measurement};
use crate::store::TrackDatabase;
use crate::types::{
    CarProfile, FuelType, NewTrack, Track, TrackBounds, TrackFilter, TrackId, TrackMeasurements,
    TrackMetadata, TrackStatus,
};

const TRACK_COLUMNS: &str = "id, name, description, remoteId, state, metadata, car_manufacturer,
     car_model, fuel_type, car_year, engine_displacement, car_id";

/// Column values written for a track row (everything except the id).
struct TrackRow<'a> {
    name: &'a str,
    description: &'a str,
    remote_id: Option<&'a str>,
    status: TrackStatus,
    metadata: &'a TrackMetadata,
    car: Option<&'a CarProfile>,
}

impl TrackRow<'_> {
    fn metadata_json(&self) -> Result<Option<String>> {
        if self.metadata.is_empty() {
            Ok(None)
        } else {
            self.metadata.to_json().map(Some)
        }
    }
}

fn insert_row(conn: &Connection, id: Option<TrackId>, row: &TrackRow<'_>) -> Result<TrackId> {
    let metadata = row.metadata_json()?;
    let car = row.car;

    conn.execute(
        "INSERT OR REPLACE INTO tracks (id, name, description, remoteId, state, metadata,
             car_manufacturer, car_model, fuel_type, car_year, engine_displacement, car_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id.map(|i| i.0),
            row.name,
            row.description,
            row.remote_id,
            row.status.as_str(),
            metadata,
            car.map(|c| c.manufacturer.as_str()),
            car.map(|c| c.model.as_str()),
            car.map(|c| c.fuel_type.as_str()),
            car.map(|c| c.construction_year),
            car.map(|c| c.engine_displacement_cc),
            car.and_then(|c| c.id.as_deref()),
        ],
    )?;

    Ok(id.unwrap_or(TrackId(conn.last_insert_rowid())))
}

/// Read a car snapshot. Any missing required column means "no car".
fn car_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<CarProfile>> {
    let manufacturer: Option<String> = row.get(6)?;
    let model: Option<String> = row.get(7)?;
    let fuel_type: Option<String> = row.get(8)?;
    let year: Option<i32> = row.get(9)?;
    let displacement: Option<i32> = row.get(10)?;
    let id: Option<String> = row.get(11)?;

    let (Some(manufacturer), Some(model), Some(fuel_name), Some(year), Some(displacement)) =
        (manufacturer, model, fuel_type, year, displacement)
    else {
        return Ok(None);
    };

    let Some(fuel_type) = FuelType::from_str(&fuel_name) else {
        warn!("[TrackStore] Unknown fuel type '{}', dropping car", fuel_name);
        return Ok(None);
    };

    Ok(Some(CarProfile {
        id,
        manufacturer,
        model,
        fuel_type,
        construction_year: year,
        engine_displacement_cc: displacement,
    }))
}

fn track_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(TrackId, NewTrack)> {
    let id = TrackId(row.get(0)?);

    let remote_id: Option<String> = row.get(3)?;
    let remote_id = remote_id.filter(|r| !r.is_empty());

    let state: Option<String> = row.get(4)?;
    // Rows without a readable state predate status tracking and count as finished
    let status = state
        .as_deref()
        .and_then(TrackStatus::from_str)
        .unwrap_or(TrackStatus::Finished);

    let metadata_json: Option<String> = row.get(5)?;
    let metadata = match metadata_json {
        Some(json) => TrackMetadata::from_json(&json).unwrap_or_else(|e| {
            warn!("[TrackStore] Unreadable metadata for track {}: {}", id, e);
            TrackMetadata::new()
        }),
        None => TrackMetadata::new(),
    };

    let track = NewTrack {
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        remote_id,
        status,
        car: car_from_row(row)?,
        metadata,
        measurements: Vec::new(),
    };

    Ok((id, track))
}

impl TrackDatabase {
    // ========================================================================
    // Create / Update
    // ========================================================================

    /// Persist a new track and the readings it carries.
    ///
    /// Stale measurement rows already filed under the new id are removed first.
    /// Carried readings respect the finished guard unless `skip_finished_check`
    /// is set (used when importing remote tracks). Everything runs in one
    /// transaction, so a rejected or unencodable reading leaves nothing behind.
    pub fn create_track(&mut self, track: &NewTrack, skip_finished_check: bool) -> Result<TrackId> {
        let tx = self.db.transaction()?;

        let row = TrackRow {
            name: &track.name,
            description: &track.description,
            remote_id: track.remote_id.as_deref(),
            status: track.status,
            metadata: &track.metadata,
            car: track.car.as_ref(),
        };
        let id = insert_row(&tx, None, &row)?;

        let stale = delete_measurements(&tx, id)?;
        if stale > 0 {
            warn!(
                "[TrackStore] Removed {} stale measurements filed under new track {}",
                stale, id
            );
        }

        if !track.measurements.is_empty() {
            let finished = track.remote_id.is_some() || track.status == TrackStatus::Finished;
            if finished && !skip_finished_check {
                return Err(TrackError::TrackAlreadyFinished { track_id: id });
            }
            for measurement in &track.measurements {
                insert_measurement(&tx, id, measurement)?;
            }
        }

        tx.commit()?;
        info!(
            "[TrackStore] Created track {} '{}' with {} measurements",
            id,
            track.name,
            track.measurements.len()
        );
        Ok(id)
    }

    /// Replace the stored row for `track` (upsert by id).
    ///
    /// Refuses to store a finished track as active again.
    pub fn update_track(&self, track: &Track) -> Result<bool> {
        debug!("[TrackStore] update_track: {}", track.id());

        let stored: Option<Option<String>> = self
            .db
            .query_row(
                "SELECT state FROM tracks WHERE id = ?",
                params![track.id().0],
                |row| row.get(0),
            )
            .optional()?;
        let was_finished = stored.flatten().as_deref() == Some(TrackStatus::Finished.as_str());
        if was_finished && track.status() == TrackStatus::Active {
            return Err(TrackError::InvalidStatusTransition {
                track_id: track.id(),
            });
        }

        let row = TrackRow {
            name: &track.name,
            description: &track.description,
            remote_id: track.remote_id.as_deref(),
            status: track.status(),
            metadata: &track.metadata,
            car: track.car.as_ref(),
        };
        insert_row(&self.db, Some(track.id()), &row)?;
        Ok(self.db.changes() > 0)
    }

    /// Merge `metadata` into a track's stored document and return the result.
    pub fn update_metadata(&self, id: TrackId, metadata: &TrackMetadata) -> Result<TrackMetadata> {
        let mut track = self.get_track(id, true)?.ok_or_not_found(id)?;
        track.metadata.merge(metadata);
        self.update_track(&track)?;
        Ok(track.metadata)
    }

    /// Link a local track to its remote copy.
    pub fn mark_remote(&self, id: TrackId, remote_id: &str) -> Result<bool> {
        let changed = self.db.execute(
            "UPDATE tracks SET remoteId = ? WHERE id = ?",
            params![remote_id, id.0],
        )?;
        Ok(changed > 0)
    }

    /// Rewrite the car reference of every track pointing at `old_car_id`.
    pub fn update_car_reference(&self, old_car_id: &str, new_car_id: &str) -> Result<usize> {
        let changed = self.db.execute(
            "UPDATE tracks SET car_id = ? WHERE car_id = ?",
            params![new_car_id, old_car_id],
        )?;
        info!(
            "[TrackStore] Moved {} tracks from car {} to {}",
            changed, old_car_id, new_car_id
        );
        Ok(changed)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn load_track_measurements(&self, id: TrackId, lazy: bool) -> Result<TrackMeasurements> {
        if !lazy {
            return Ok(TrackMeasurements::Full(self.measurements_for_track(id)?));
        }
        let bounds = match (self.first_measurement(id)?, self.last_measurement(id)?) {
            (Some(first), Some(last)) => Some(TrackBounds { first, last }),
            _ => None,
        };
        Ok(TrackMeasurements::Summary(bounds))
    }

    fn assemble(&self, rows: Vec<(TrackId, NewTrack)>, lazy: bool) -> Result<Vec<Track>> {
        rows.into_iter()
            .map(|(id, row)| {
                let measurements = self.load_track_measurements(id, lazy)?;
                Ok(Track::from_row(id, row, measurements))
            })
            .collect()
    }

    /// Fetch a track. `lazy` loads only its boundary readings.
    pub fn get_track(&self, id: TrackId, lazy: bool) -> Result<Option<Track>> {
        let row = self
            .db
            .query_row(
                &format!("SELECT {} FROM tracks WHERE id = ?", TRACK_COLUMNS),
                params![id.0],
                track_from_row,
            )
            .optional()?;

        match row {
            Some(row) => Ok(self.assemble(vec![row], lazy)?.pop()),
            None => Ok(None),
        }
    }

    /// Upgrade a lazily loaded track to its full measurement sequence.
    pub fn load_measurements(&self, track: &mut Track) -> Result<()> {
        let all = self.measurements_for_track(track.id())?;
        track.set_measurements(all);
        Ok(())
    }

    pub fn has_track(&self, id: TrackId) -> Result<bool> {
        let found: Option<i64> = self
            .db
            .query_row("SELECT 1 FROM tracks WHERE id = ?", params![id.0], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Tracks matching `filter`, in ascending id order.
    pub fn list_tracks(&self, filter: TrackFilter, lazy: bool) -> Result<Vec<Track>> {
        let condition = match filter {
            TrackFilter::All => "",
            TrackFilter::Local => "WHERE remoteId IS NULL OR remoteId = ''",
            TrackFilter::Remote => "WHERE remoteId IS NOT NULL AND remoteId != ''",
        };
        let mut stmt = self.db.prepare(&format!(
            "SELECT {} FROM tracks {} ORDER BY id ASC",
            TRACK_COLUMNS, condition
        ))?;
        let rows = stmt
            .query_map([], track_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        self.assemble(rows, lazy)
    }

    /// The "most recently used" track.
    ///
    /// This is the track with the highest id, i.e. the last one created, not
    /// the last one modified. Insertion order stands in for recency.
    pub fn most_recently_used(&self, lazy: bool) -> Result<Option<Track>> {
        let row = self
            .db
            .query_row(
                &format!("SELECT {} FROM tracks ORDER BY id DESC LIMIT 1", TRACK_COLUMNS),
                [],
                track_from_row,
            )
            .optional()?;

        match row {
            Some(row) => Ok(self.assemble(vec![row], lazy)?.pop()),
            None => Ok(None),
        }
    }

    pub fn count_tracks(&self) -> Result<u64> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_remote_tracks(&self) -> Result<u64> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM tracks WHERE remoteId IS NOT NULL AND remoteId != ''",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Delete a track and its measurements. Returns whether the track existed.
    pub fn delete_track(&mut self, id: TrackId) -> Result<bool> {
        let tx = self.db.transaction()?;
        let removed = tx.execute("DELETE FROM tracks WHERE id = ?", params![id.0])?;
        let measurements = delete_measurements(&tx, id)?;
        tx.commit()?;

        info!(
            "[TrackStore] Deleted track {} ({} measurements)",
            id, measurements
        );
        Ok(removed > 0)
    }

    /// Delete every track and measurement.
    pub fn delete_all_tracks(&mut self) -> Result<()> {
        let tx = self.db.transaction()?;
        tx.execute_batch("DELETE FROM measurements; DELETE FROM tracks;")?;
        tx.commit()?;
        info!("[TrackStore] Deleted all tracks");
        Ok(())
    }

    /// Delete remote tracks and their measurements. Returns the number of tracks removed.
    pub fn delete_all_remote_tracks(&mut self) -> Result<usize> {
        let tx = self.db.transaction()?;
        tx.execute(
            "DELETE FROM measurements WHERE track_id IN
                 (SELECT id FROM tracks WHERE remoteId IS NOT NULL AND remoteId != '')",
            [],
        )?;
        let removed = tx.execute(
            "DELETE FROM tracks WHERE remoteId IS NOT NULL AND remoteId != ''",
            [],
        )?;
        tx.commit()?;

        info!("[TrackStore] Deleted {} remote tracks", removed);
        Ok(removed)
    }
}
