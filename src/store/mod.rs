//! Durable retention store for readings.
//!
//! Readings are appended to a single SQLite table keyed by a millisecond
//! timestamp. Queries and purges only ever filter on that key, and all access
//! goes through one connection, so every statement sees a consistent snapshot.

use crate::events::{ReadingSink, SinkError};
use crate::source::types::Reading;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the retention store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: i32, supported: i32 },

    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

/// A persisted reading with its store-assigned identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub thermal: i64,
    pub light: i64,
}

impl RetentionRecord {
    pub fn reading(&self) -> Reading {
        Reading::at(self.timestamp, self.thermal, self.light)
    }
}

/// SQLite-backed append-only log with age-based purge.
pub struct RetentionStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl RetentionStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(path)?;
        if let Err(e) =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        {
            warn!(error = %e, "failed to enable WAL mode");
        }
        run_migrations(&mut conn)?;

        info!(path = %path.display(), "retention store opened");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a store that lives only as long as this value.
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Durably record a reading, returning its assigned id.
    pub fn append(&self, reading: &Reading) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO sensor_data (timestamp, thermal_value, light_value) VALUES (?1, ?2, ?3)",
            params![
                reading.timestamp.timestamp_millis(),
                reading.thermal,
                reading.light
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, "reading stored");
        Ok(id)
    }

    /// Records no older than `horizon`, oldest first.
    pub fn query_recent(&self, horizon: Duration) -> StoreResult<Vec<RetentionRecord>> {
        self.query_recent_at(horizon, Utc::now())
    }

    /// Records with timestamp at or after `now - horizon`, oldest first.
    pub fn query_recent_at(
        &self,
        horizon: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RetentionRecord>> {
        let cutoff = (now - horizon).timestamp_millis();
        self.collect(
            "SELECT id, timestamp, thermal_value, light_value
             FROM sensor_data
             WHERE timestamp >= ?1
             ORDER BY timestamp ASC, id ASC",
            params![cutoff],
        )
    }

    /// Records with `from <= timestamp <= to`, oldest first.
    pub fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RetentionRecord>> {
        self.collect(
            "SELECT id, timestamp, thermal_value, light_value
             FROM sensor_data
             WHERE timestamp >= ?1 AND timestamp <= ?2
             ORDER BY timestamp ASC, id ASC",
            params![from.timestamp_millis(), to.timestamp_millis()],
        )
    }

    /// Delete records older than `horizon`, returning how many were removed.
    pub fn purge_older_than(&self, horizon: Duration) -> StoreResult<usize> {
        self.purge_older_than_at(horizon, Utc::now())
    }

    /// Delete records with timestamp before `now - horizon`.
    pub fn purge_older_than_at(&self, horizon: Duration, now: DateTime<Utc>) -> StoreResult<usize> {
        let cutoff = (now - horizon).timestamp_millis();
        let removed = self
            .conn
            .execute("DELETE FROM sensor_data WHERE timestamp < ?1", params![cutoff])?;
        info!(removed, "purged expired readings");
        Ok(removed)
    }

    /// Number of stored records.
    pub fn count(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sensor_data", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn collect(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<RetentionRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, millis, thermal, light) = row?;
            records.push(RetentionRecord {
                id,
                timestamp: from_millis(millis)?,
                thermal,
                light,
            });
        }
        Ok(records)
    }
}

fn from_millis(millis: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(StoreError::InvalidTimestamp(millis))
}

fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        version += 1;
        apply_migration(&tx, version)?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> StoreResult<()> {
    match version {
        1 => tx.execute_batch(include_str!("schema_v1.sql"))?,
        _ => unreachable!("no migration for schema version {version}"),
    }
    Ok(())
}

/// Thread-safe shared retention store.
pub type SharedStore = Arc<Mutex<RetentionStore>>;

/// Wrap a store for sharing between the arbiter and the scheduler.
pub fn create_shared_store(store: RetentionStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Lock a shared store, recovering from a poisoned lock.
pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, RetentionStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReadingSink for SharedStore {
    fn name(&self) -> &'static str {
        "retention store"
    }

    fn accept(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let sink = self.name();
        lock_store(self)
            .append(reading)
            .map(|_| ())
            .map_err(|e| SinkError::new(sink, e))
    }
}
