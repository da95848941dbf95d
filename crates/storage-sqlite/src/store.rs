use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use waypoint_storage::{
    AuditStore, ExecutionRecord, MetadataStore, StorageError, VersionMarkerRecord,
};

use crate::schema::BOOTSTRAP;

/// Metadata and audit store backed by a single SQLite database file.
///
/// The connection is guarded by a mutex; every call runs to completion
/// before the next one takes the lock.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(backend)?;
        apply_pragmas(&conn)?;
        bootstrap(&conn)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        bootstrap(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, StorageError> {
        table_exists(&*self.lock()?, name)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Backend("sqlite connection lock poisoned".to_string()))
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "journal_mode", &"WAL")
        .map_err(backend)?;
    conn.pragma_update(None, "synchronous", &"NORMAL")
        .map_err(backend)?;
    conn.pragma_update(None, "foreign_keys", &"ON")
        .map_err(backend)?;
    Ok(())
}

fn bootstrap(conn: &Connection) -> Result<(), StorageError> {
    if !table_exists(conn, "version_markers")? {
        tracing::info!("creating waypoint bookkeeping tables");
        conn.execute_batch(BOOTSTRAP).map_err(backend)?;
    }
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, StorageError> {
    let cnt: i64 = conn
        .query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )
        .map_err(backend)?;
    Ok(cnt > 0)
}

fn backend(e: rusqlite::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn get_marker(&self, name: &str) -> Result<Option<VersionMarkerRecord>, StorageError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT version, recorded_at FROM version_markers WHERE name=?",
            [name],
            |r| {
                Ok(VersionMarkerRecord {
                    version: r.get(0)?,
                    recorded_at: r.get(1)?,
                })
            },
        )
        .optional()
        .map_err(backend)
    }

    async fn set_marker(
        &self,
        name: &str,
        record: VersionMarkerRecord,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO version_markers(name,version,recorded_at) VALUES (?,?,?)
             ON CONFLICT(name) DO UPDATE SET version=excluded.version, recorded_at=excluded.recorded_at",
            params![name, record.version, record.recorded_at],
        )
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn insert_execution(&self, record: ExecutionRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO migration_runs(initial_version,target_version,details,created_at) VALUES (?,?,?,?)",
            params![
                record.initial_version,
                record.target_version,
                record.details,
                record.created_at
            ],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn list_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StorageError> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit: i64 = if limit == 0 { -1 } else { limit as i64 };
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT initial_version, target_version, details, created_at
                 FROM migration_runs ORDER BY run_id DESC LIMIT ?",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map([limit], |r| {
                Ok(ExecutionRecord {
                    initial_version: r.get(0)?,
                    target_version: r.get(1)?,
                    details: r.get(2)?,
                    created_at: r.get(3)?,
                })
            })
            .map_err(backend)?;
        let records = rows.collect::<Result<Vec<_>, _>>().map_err(backend)?;
        Ok(records)
    }
}
