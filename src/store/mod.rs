//! SQLite persistence for documents, pages, predictions, extractions, jobs
//! and events.
//!
//! ## Execution model
//!
//! `rusqlite` is a synchronous API. Every database call goes through
//! [`Store::write`] or [`Store::read`], which move the closure onto Tokio's
//! blocking pool with `spawn_blocking` so a slow disk never stalls the async
//! workers that drive other jobs. A single connection behind a mutex
//! serialises access; each `write` is one transaction that commits or rolls
//! back as a unit.
//!
//! ## Idempotency
//!
//! Every insert is keyed by a natural unique constraint and written with
//! `INSERT ... ON CONFLICT DO NOTHING`, so re-running any step of a sync is a
//! no-op for rows that already exist.
//!
//! Queries are grouped by entity:
//!
//! * [`pages`]: documents, pages, type predictions, extracted records
//! * [`jobs`]: sync jobs and their event stream
//! * [`reports`]: read-only views used by callers (document listings)

pub mod jobs;
pub mod models;
pub mod pages;
pub mod reports;
mod schema;

use crate::error::SyncError;
use rusqlite::{Connection, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

pub use models::*;

/// Handle to the pipeline database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database file at `path` and create the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, SyncError> {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            info!("Opened database {}", path.display());
            Ok(conn)
        })
        .await
        .map_err(|e| SyncError::Internal(format!("Database open task panicked: {e}")))??;

        let store = Self::from_connection(conn)?;
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Open a private in-memory database with the schema already created.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let store = Self::from_connection(Connection::open_in_memory()?)?;
        store.ensure_schema().await?;
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Result<Self, SyncError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create all tables and indexes. Safe to call any number of times.
    pub async fn ensure_schema(&self) -> Result<(), SyncError> {
        self.write(|conn| conn.execute_batch(schema::SCHEMA)).await?;
        debug!("Schema ensured");
        Ok(())
    }

    /// Run `f` inside one transaction on the blocking pool.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back (on drop)
    /// when it returns `Err`.
    pub async fn write<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<T, SyncError> {
            let mut guard = conn
                .lock()
                .map_err(|_| SyncError::Internal("database lock poisoned".into()))?;
            let tx = guard.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
        .map_err(|e| SyncError::Internal(format!("Database task panicked: {e}")))?
    }

    /// Run a read-only `f` on the blocking pool.
    pub async fn read<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<T, SyncError> {
            let guard = conn
                .lock()
                .map_err(|_| SyncError::Internal("database lock poisoned".into()))?;
            Ok(f(&guard)?)
        })
        .await
        .map_err(|e| SyncError::Internal(format!("Database task panicked: {e}")))?
    }

    /// Row counts for every table.
    pub async fn table_counts(&self) -> Result<TableCounts, SyncError> {
        self.read(|conn| {
            let count = |table: &str| -> rusqlite::Result<u64> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|n| n as u64)
            };
            Ok(TableCounts {
                documents: count("documents")?,
                pages: count("pages")?,
                predictions: count("page_type_predictions")?,
                extractions: count("page_parsed")?,
                jobs: count("sync_jobs")?,
                events: count("sync_events")?,
            })
        })
        .await
    }
}

/// Read a TEXT column and parse it with `FromStr`.
pub(crate) fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("{e}").into(),
        )
    })
}

/// Read a TEXT column holding JSON; NULL and empty strings become `{}`.
pub(crate) fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: Option<String> = row.get(idx)?;
    match raw.as_deref() {
        None | Some("") => Ok(serde_json::Value::Object(Default::default())),
        Some(s) => serde_json::from_str(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

/// Serialise a value for a JSON TEXT column inside a rusqlite closure.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}
