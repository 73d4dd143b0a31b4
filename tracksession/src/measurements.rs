//! Measurement store: readings keyed by their owning track.
//!
//! Inserts are plain appends. The finished-track guard belongs to the caller
//! (see [`crate::session`]).

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::properties;
use crate::store::TrackDatabase;
use crate::types::{Measurement, MeasurementId, NewMeasurement, Position, TrackId};

const MEASUREMENT_COLUMNS: &str = "id, latitude, longitude, time, properties, track_id";

/// A measurement row before its properties are decoded.
struct RawMeasurement {
    id: i64,
    latitude: f64,
    longitude: f64,
    time: i64,
    properties: Option<String>,
    track_id: i64,
}

impl RawMeasurement {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            latitude: row.get(1)?,
            longitude: row.get(2)?,
            time: row.get(3)?,
            properties: row.get(4)?,
            track_id: row.get(5)?,
        })
    }

    fn decode(self) -> Result<Measurement> {
        Ok(Measurement {
            id: MeasurementId(self.id),
            track_id: TrackId(self.track_id),
            time: self.time,
            position: Position::new(self.latitude, self.longitude),
            properties: properties::decode(self.properties.as_deref())?,
        })
    }
}

/// Insert one reading. Properties are encoded before anything is written.
pub(crate) fn insert_measurement(
    conn: &Connection,
    track_id: TrackId,
    measurement: &NewMeasurement,
) -> Result<MeasurementId> {
    let encoded = properties::encode(&measurement.properties)?;

    conn.execute(
        "INSERT INTO measurements (latitude, longitude, time, properties, track_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            measurement.position.latitude,
            measurement.position.longitude,
            measurement.time,
            encoded,
            track_id.0
        ],
    )?;

    Ok(MeasurementId(conn.last_insert_rowid()))
}

pub(crate) fn delete_measurements(conn: &Connection, track_id: TrackId) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM measurements WHERE track_id = ?",
        params![track_id.0],
    )?)
}

/// Fetch the single boundary row in the given time direction.
fn boundary_measurement(
    conn: &Connection,
    track_id: TrackId,
    order: &str,
) -> Result<Option<Measurement>> {
    let sql = format!(
        "SELECT {} FROM measurements WHERE track_id = ?
         ORDER BY time {order}, id {order} LIMIT 1",
        MEASUREMENT_COLUMNS
    );
    let raw = conn
        .query_row(&sql, params![track_id.0], RawMeasurement::from_row)
        .optional()?;

    raw.map(RawMeasurement::decode).transpose()
}

impl TrackDatabase {
    /// Append a reading to a track. No dedup and no ordering checks.
    pub fn append_measurement(
        &self,
        track_id: TrackId,
        measurement: &NewMeasurement,
    ) -> Result<MeasurementId> {
        insert_measurement(&self.db, track_id, measurement)
    }

    /// All readings of a track ordered by time ascending. Empty if there are none.
    pub fn measurements_for_track(&self, track_id: TrackId) -> Result<Vec<Measurement>> {
        let mut stmt = self.db.prepare(&format!(
            "SELECT {} FROM measurements WHERE track_id = ? ORDER BY time ASC, id ASC",
            MEASUREMENT_COLUMNS
        ))?;

        let raws = stmt
            .query_map(params![track_id.0], RawMeasurement::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raws.into_iter().map(RawMeasurement::decode).collect()
    }

    /// Earliest reading of a track, if any.
    pub fn first_measurement(&self, track_id: TrackId) -> Result<Option<Measurement>> {
        boundary_measurement(&self.db, track_id, "ASC")
    }

    /// Latest reading of a track, if any.
    pub fn last_measurement(&self, track_id: TrackId) -> Result<Option<Measurement>> {
        boundary_measurement(&self.db, track_id, "DESC")
    }

    pub fn count_measurements(&self, track_id: TrackId) -> Result<u64> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM measurements WHERE track_id = ?",
            params![track_id.0],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Delete every reading of a track. Idempotent.
    pub fn delete_measurements_for_track(&self, track_id: TrackId) -> Result<usize> {
        delete_measurements(&self.db, track_id)
    }
}
