//! Database schema and the destructive upgrade policy.
//!
//! The schema is versioned through `PRAGMA user_version`. A database written by
//! an older version is NOT migrated: both tables are dropped and recreated,
//! discarding every stored track. A database written by a newer version is
//! refused.

use log::{info, warn};
use rusqlite::Connection;

use crate::error::{Result, TrackError};

/// Current schema version. Bump it whenever a column changes.
pub const SCHEMA_VERSION: i32 = 1;

const CREATE_TABLES: &str = r#"
    -- AUTOINCREMENT so deleted track ids are never handed out again
    CREATE TABLE IF NOT EXISTS tracks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        description TEXT,
        remoteId TEXT,
        state TEXT,
        metadata TEXT,
        car_manufacturer TEXT,
        car_model TEXT,
        fuel_type TEXT,
        car_year INTEGER,
        engine_displacement INTEGER,
        car_id TEXT
    );

    -- track_id is a reference by value, not a foreign key
    CREATE TABLE IF NOT EXISTS measurements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        latitude REAL,
        longitude REAL,
        time INTEGER,
        properties TEXT,
        track_id INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_measurements_track_time ON measurements(track_id, time);
"#;

const DROP_TABLES: &str = r#"
    DROP TABLE IF EXISTS measurements;
    DROP TABLE IF EXISTS tracks;
"#;

/// Read the stored schema version (0 for a fresh database).
pub fn stored_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the database to [`SCHEMA_VERSION`], wiping it if it is older.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    ensure_schema_version(conn, SCHEMA_VERSION)
}

pub(crate) fn ensure_schema_version(conn: &Connection, target: i32) -> Result<()> {
    let version = stored_version(conn)?;

    if version > target {
        return Err(TrackError::SchemaTooNew {
            found: version,
            supported: target,
        });
    }

    if version == target {
        return Ok(());
    }

    if version == 0 {
        info!("[Schema] Creating tables at version {}", target);
    } else {
        warn!(
            "[Schema] Upgrading database from version {} to {}, which will destroy all old data",
            version, target
        );
    }
    // Unversioned leftovers are dropped as well
    wipe_and_recreate(conn)?;

    conn.pragma_update(None, "user_version", target)?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES)?;
    Ok(())
}

/// Drop both tables and recreate them empty.
pub fn wipe_and_recreate(conn: &Connection) -> Result<()> {
    conn.execute_batch(DROP_TABLES)?;
    create_tables(conn)
}
