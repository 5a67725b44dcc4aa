//! Append-only history of every ingested record, backed by SQLite.

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::PersistenceError;
use crate::record::{BatchId, VehiclePositionRecord};

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Durable, immutable record history.
///
/// Only the ingestion scheduler appends. Readers may query concurrently; a
/// batch is either fully visible or not visible at all.
pub trait HistoryStore: Send {
    /// Persists a whole batch in one transaction and writes the assigned row
    /// ids back into `records` once it has committed.
    fn append(&mut self, records: &mut [VehiclePositionRecord]) -> Result<()>;

    /// Records of the newest batch, ordered by observed timestamp.
    fn latest_batch(&self) -> Result<Vec<VehiclePositionRecord>>;

    /// Records of `batch_id` in insertion order.
    fn batch(&self, batch_id: BatchId) -> Result<Vec<VehiclePositionRecord>>;

    fn batch_ids(&self) -> Result<BTreeSet<BatchId>>;

    fn latest_batch_id(&self) -> Result<Option<BatchId>>;

    fn record_count(&self) -> Result<u64>;
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS vehicle_position (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id               INTEGER NOT NULL,
    fetch_timestamp        INTEGER NOT NULL,
    observed_timestamp     INTEGER NOT NULL,
    trip_id                TEXT,
    route_id               TEXT,
    vehicle_id             TEXT NOT NULL,
    vehicle_label          TEXT NOT NULL,
    latitude               REAL NOT NULL,
    longitude              REAL NOT NULL,
    bearing                REAL,
    odometer               REAL,
    speed                  REAL,
    apparent_velocity_lat  REAL,
    apparent_velocity_long REAL
);
CREATE INDEX IF NOT EXISTS idx_vehicle_position_batch_id
    ON vehicle_position (batch_id);
CREATE INDEX IF NOT EXISTS idx_vehicle_position_observed_timestamp
    ON vehicle_position (observed_timestamp);
CREATE INDEX IF NOT EXISTS idx_vehicle_position_fetch_timestamp
    ON vehicle_position (fetch_timestamp);
";

const SELECT_COLUMNS: &str = "id, batch_id, fetch_timestamp, observed_timestamp, trip_id, \
     route_id, vehicle_id, vehicle_label, latitude, longitude, bearing, odometer, speed, \
     apparent_velocity_lat, apparent_velocity_long";

pub struct SqliteHistoryStore {
    conn: Connection,
}

impl SqliteHistoryStore {
    /// Opens or creates the store at `path`, creating parent directories and
    /// the schema as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = %path.display(), "History store opened");
        Ok(Self { conn })
    }

    /// Opens the store for a read client. The connection refuses writes.
    pub fn open_reader(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self::open(path)?;
        store.conn.pragma_update(None, "query_only", true)?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<VehiclePositionRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, map_record_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&mut self, records: &mut [VehiclePositionRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(records.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO vehicle_position (
                    batch_id, fetch_timestamp, observed_timestamp, trip_id, route_id,
                    vehicle_id, vehicle_label, latitude, longitude, bearing, odometer,
                    speed, apparent_velocity_lat, apparent_velocity_long
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for r in records.iter() {
                stmt.execute(params![
                    r.batch_id.0,
                    r.fetch_timestamp,
                    r.observed_timestamp,
                    r.trip_id,
                    r.route_id,
                    r.vehicle_id,
                    r.vehicle_label,
                    r.latitude,
                    r.longitude,
                    r.bearing,
                    r.odometer,
                    r.speed,
                    r.apparent_velocity_lat,
                    r.apparent_velocity_long,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;

        for (r, id) in records.iter_mut().zip(ids) {
            r.id = Some(id);
        }
        Ok(())
    }

    fn latest_batch(&self) -> Result<Vec<VehiclePositionRecord>> {
        self.query_records(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM vehicle_position
                 WHERE batch_id = (SELECT MAX(batch_id) FROM vehicle_position)
                 ORDER BY observed_timestamp, id"
            ),
            [],
        )
    }

    fn batch(&self, batch_id: BatchId) -> Result<Vec<VehiclePositionRecord>> {
        self.query_records(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM vehicle_position
                 WHERE batch_id = ?1
                 ORDER BY batch_id, id"
            ),
            params![batch_id.0],
        )
    }

    fn batch_ids(&self) -> Result<BTreeSet<BatchId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT batch_id FROM vehicle_position")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(BatchId))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(ids)
    }

    fn latest_batch_id(&self) -> Result<Option<BatchId>> {
        let id = self
            .conn
            .query_row("SELECT MAX(batch_id) FROM vehicle_position", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();
        Ok(id.map(BatchId))
    }

    fn record_count(&self) -> Result<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM vehicle_position", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn map_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VehiclePositionRecord> {
    Ok(VehiclePositionRecord {
        id: row.get(0)?,
        batch_id: BatchId(row.get(1)?),
        fetch_timestamp: row.get(2)?,
        observed_timestamp: row.get(3)?,
        trip_id: row.get(4)?,
        route_id: row.get(5)?,
        vehicle_id: row.get(6)?,
        vehicle_label: row.get(7)?,
        latitude: row.get(8)?,
        longitude: row.get(9)?,
        bearing: row.get(10)?,
        odometer: row.get(11)?,
        speed: row.get(12)?,
        apparent_velocity_lat: row.get(13)?,
        apparent_velocity_long: row.get(14)?,
    })
}
