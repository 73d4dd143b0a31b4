//! SQLite-backed storage for tracks and measurements.
//!
//! [`TrackDatabase`] owns the connection. Track operations live in
//! [`crate::tracks`], measurement operations in [`crate::measurements`].

use log::info;
use rusqlite::Connection;

use crate::error::Result;
use crate::schema;

/// Owner of the SQLite connection backing the track and measurement tables.
pub struct TrackDatabase {
    pub(crate) db: Connection,
    db_path: String,
}

impl TrackDatabase {
    /// Open (or create) the database at `db_path` and bring its schema up to date.
    pub fn open(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        schema::ensure_schema(&db)?;
        info!("[TrackStore] Opened database at {}", db_path);

        Ok(Self {
            db,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }
}
