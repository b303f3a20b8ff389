//! SQLite Store
//!
//! [`RecordStore`] backed by a single rusqlite connection.

use std::path::Path;
use std::sync::Arc;

use chrono::DateTime;
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, Row, params, params_from_iter};

use super::{PageRow, RecordStore, StoreError};
use crate::domain::{RecordId, TourRecord};
use crate::query::{JOINED_COLUMN_START, SqlQuery};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tour (
    id               INTEGER PRIMARY KEY,
    start_time       INTEGER NOT NULL,
    title            TEXT,
    distance         REAL,
    elapsed_time     INTEGER,
    moving_time      INTEGER,
    avg_pulse        REAL,
    calories         INTEGER,
    start_place      TEXT,
    end_place        TEXT,
    tour_type_id     INTEGER,
    import_file_name TEXT
);

CREATE TABLE IF NOT EXISTS tour_tag (
    tour_id INTEGER NOT NULL REFERENCES tour(id),
    tag_id  INTEGER NOT NULL,
    PRIMARY KEY (tour_id, tag_id)
);

CREATE TABLE IF NOT EXISTS tour_marker (
    id      INTEGER PRIMARY KEY,
    tour_id INTEGER NOT NULL REFERENCES tour(id),
    label   TEXT
);

CREATE INDEX IF NOT EXISTS idx_tour_start_time ON tour(start_time);
CREATE INDEX IF NOT EXISTS idx_tour_marker_tour ON tour_marker(tour_id);
"#;

/// SQLite-backed tour store
///
/// The connection is shared behind a mutex; the loader's workers run their
/// statements one at a time anyway.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(store_error)?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(store_error)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Create tables and indexes if they don't exist
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(SCHEMA).map_err(store_error)?;
        tracing::info!("Tour schema initialized");
        Ok(())
    }

    /// Insert tours together with their tags and markers
    pub fn insert_tours(&self, tours: &[TourRecord]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_error)?;

        for tour in tours {
            tx.execute(
                "INSERT INTO tour (id, start_time, title, distance, elapsed_time, moving_time, \
                 avg_pulse, calories, start_place, end_place, tour_type_id, import_file_name) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    tour.id.get(),
                    tour.start_time.timestamp_millis(),
                    tour.title,
                    tour.distance,
                    tour.elapsed_time,
                    tour.moving_time,
                    tour.avg_pulse,
                    tour.calories,
                    tour.start_place,
                    tour.end_place,
                    tour.tour_type_id,
                    tour.import_file_name,
                ],
            )
            .map_err(store_error)?;

            for tag_id in &tour.tag_ids {
                tx.execute(
                    "INSERT INTO tour_tag (tour_id, tag_id) VALUES (?1, ?2)",
                    params![tour.id.get(), tag_id],
                )
                .map_err(store_error)?;
            }
            for marker_id in &tour.marker_ids {
                tx.execute(
                    "INSERT INTO tour_marker (id, tour_id) VALUES (?1, ?2)",
                    params![marker_id, tour.id.get()],
                )
                .map_err(store_error)?;
            }
        }

        tx.commit().map_err(store_error)?;
        tracing::debug!("Inserted {} tours", tours.len());
        Ok(())
    }
}

impl RecordStore for SqliteStore {
    fn count(&self, query: &SqlQuery) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&query.sql).map_err(store_error)?;
        let count: i64 = stmt
            .query_row(params_from_iter(query.params.iter()), |row| row.get(0))
            .map_err(store_error)?;
        Ok(count.max(0) as u64)
    }

    fn record_ids(&self, query: &SqlQuery) -> Result<Vec<RecordId>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&query.sql).map_err(store_error)?;
        let rows = stmt
            .query_map(params_from_iter(query.params.iter()), |row| {
                row.get::<_, i64>(0).map(RecordId)
            })
            .map_err(store_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    fn page_rows(&self, query: &SqlQuery) -> Result<Vec<PageRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&query.sql).map_err(store_error)?;
        let rows = stmt
            .query_map(params_from_iter(query.params.iter()), decode_page_row)
            .map_err(store_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }
}

impl Clone for SqliteStore {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// Decode one row of the page query (column order of `RECORD_COLUMNS`)
fn decode_page_row(row: &Row<'_>) -> rusqlite::Result<PageRow> {
    let start_ms: i64 = row.get(1)?;
    let start_time = DateTime::from_timestamp_millis(start_ms)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(1, start_ms))?;

    let record = TourRecord {
        id: RecordId(row.get(0)?),
        start_time,
        title: row.get(2)?,
        distance: row.get(3)?,
        elapsed_time: row.get(4)?,
        moving_time: row.get(5)?,
        avg_pulse: row.get(6)?,
        calories: row.get(7)?,
        start_place: row.get(8)?,
        end_place: row.get(9)?,
        tour_type_id: row.get(10)?,
        import_file_name: row.get(11)?,
        tag_ids: Vec::new(),
        marker_ids: Vec::new(),
    };

    Ok(PageRow {
        record,
        tag_id: row.get(JOINED_COLUMN_START)?,
        marker_id: row.get(JOINED_COLUMN_START + 1)?,
    })
}

/// Map a rusqlite error to a store error carrying an SQLite result name
fn store_error(err: rusqlite::Error) -> StoreError {
    let code = match &err {
        rusqlite::Error::InvalidParameterCount(_, _) => "SQLITE_RANGE",
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ParameterOutOfRange => "SQLITE_RANGE",
            ErrorCode::DatabaseBusy => "SQLITE_BUSY",
            ErrorCode::DatabaseLocked => "SQLITE_LOCKED",
            ErrorCode::ConstraintViolation => "SQLITE_CONSTRAINT",
            _ => "SQLITE_ERROR",
        },
        rusqlite::Error::IntegralValueOutOfRange(_, _)
        | rusqlite::Error::InvalidColumnType(_, _, _)
        | rusqlite::Error::FromSqlConversionFailure(_, _, _) => {
            return StoreError::Decode {
                message: err.to_string(),
            };
        }
        _ => "SQLITE_ERROR",
    };

    StoreError::query(code, err.to_string())
}
