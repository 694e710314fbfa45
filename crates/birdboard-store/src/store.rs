//! Connection ownership, transactions and schema migrations.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::StoreError;

const SCHEMA_VERSION: i32 = 2;

/// Migrations in order; entry `n` upgrades the schema from version `n` to `n + 1`.
const MIGRATIONS: &[&str] = &[
    // v1: species and metadata
    "CREATE TABLE species (
        id TEXT PRIMARY KEY,
        common_name TEXT,
        scientific_name TEXT,
        color TEXT,
        birdweather_url TEXT,
        ebird_url TEXT,
        wikipedia_url TEXT,
        wikipedia_summary TEXT,
        image_path TEXT,
        thumbnail_path TEXT,
        common INTEGER NOT NULL DEFAULT 0,
        detection_count INTEGER NOT NULL DEFAULT 0 CHECK (detection_count >= 0),
        latest_detection_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK ((image_path IS NULL) = (thumbnail_path IS NULL))
    );
    CREATE INDEX idx_species_latest ON species(latest_detection_at DESC);

    CREATE TABLE metadata (
        key TEXT PRIMARY KEY,
        kind TEXT NOT NULL CHECK (kind IN ('text', 'number', 'timestamp')),
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    // v2: weather snapshot
    "CREATE TABLE location_weather_config (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        forecast_office TEXT NOT NULL,
        grid_x INTEGER NOT NULL,
        grid_y INTEGER NOT NULL,
        station_id TEXT NOT NULL,
        observation_url TEXT NOT NULL,
        forecast_url TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        resolved_at TEXT NOT NULL
    );

    CREATE TABLE current_conditions (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        observed_at TEXT NOT NULL,
        temperature REAL,
        feels_like REAL,
        dew_point REAL,
        humidity REAL,
        wind_speed REAL,
        wind_direction REAL,
        wind_gust REAL,
        pressure REAL,
        visibility REAL,
        precipitation_last_hour REAL,
        precipitation_last_3h REAL,
        precipitation_last_6h REAL,
        condition TEXT,
        icon_url TEXT,
        unit_system TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE forecast_periods (
        period_index INTEGER PRIMARY KEY CHECK (period_index BETWEEN 0 AND 13),
        number INTEGER NOT NULL,
        name TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        is_daytime INTEGER NOT NULL,
        temperature REAL,
        precipitation_probability REAL,
        short_forecast TEXT,
        wind TEXT,
        icon_url TEXT,
        detailed_forecast TEXT
    );",
];

/// Local SQLite storage for species, metadata and weather.
///
/// The connection sits behind a mutex; every access runs inside a
/// transaction handed to the caller as a [`StoreTx`].
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!("Opened store at {} (journal_mode={})", path.display(), mode);
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` in a read transaction. Nothing it does is committed.
    pub fn read<T, E>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StoreError::from)?;
        let ctx = StoreTx { conn: &tx };
        f(&ctx)
    }

    /// Run `f` in a write transaction; commit on `Ok`, roll back on `Err`.
    pub fn write<T, E>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let ctx = StoreTx { conn: &tx };
        let value = f(&ctx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)", [])?;
    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?
        .unwrap_or(0);

    if version > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction()?;
    for (from, sql) in MIGRATIONS.iter().enumerate().skip(version.max(0) as usize) {
        tracing::info!("Migrating store schema from v{} to v{}", from, from + 1);
        tx.execute_batch(sql)?;
    }
    if version < SCHEMA_VERSION {
        tx.execute("DELETE FROM schema_version", [])?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])?;
    }
    tx.commit()?;
    Ok(())
}

/// Execution context for store operations, valid for one transaction.
pub struct StoreTx<'a> {
    pub(crate) conn: &'a Connection,
}

impl StoreTx<'_> {
    /// Run `f` inside a named savepoint. An `Err` rolls back only the work
    /// done inside the savepoint; the enclosing transaction continues.
    pub fn savepoint<T, E>(&self, name: &str, f: impl FnOnce(&StoreTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let ident = format!("\"{}\"", name.replace('"', "\"\""));
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", ident))
            .map_err(StoreError::from)?;

        match f(self) {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE {}", ident))
                    .map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                self.conn
                    .execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", ident))
                    .map_err(StoreError::from)?;
                Err(e)
            }
        }
    }

    pub fn schema_version(&self) -> Result<i32, StoreError> {
        Ok(self.conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?)
    }
}

/// Timestamps are stored as second-resolution RFC 3339 UTC strings so that
/// string order matches time order.
pub(crate) fn to_sql_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn from_sql_time(column: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e)))
}

pub(crate) fn from_sql_time_opt(column: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| from_sql_time(column, s)).transpose()
}
