//! libSQL backend: async `WorkerStore` implementation.
//!
//! The full worker is stored as a JSON document in `data`; the columns the
//! queries filter on (`user_id`, `status`, `next_scheduled_at`) are kept
//! alongside it. Timestamps are written as fixed-width RFC 3339 in UTC so
//! that string comparison orders them.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::WorkerStore;
use crate::worker::model::{Worker, WorkerStatus};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlWorkerStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlWorkerStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_workers(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Worker>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut workers = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => workers.push(row_to_worker(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
            }
        }
        Ok(workers)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format: `2024-01-01T09:00:00.000000Z`.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_worker(row: &libsql::Row) -> Result<Worker, DatabaseError> {
    let data: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("worker row parse: {e}")))?;
    serde_json::from_str(&data).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl WorkerStore for LibSqlWorkerStore {
    async fn put(&self, worker: &Worker) -> Result<(), DatabaseError> {
        let data = serde_json::to_string(worker)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO workers (id, user_id, worker_type, status, next_scheduled_at, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (id) DO UPDATE SET
                    status = excluded.status,
                    next_scheduled_at = excluded.next_scheduled_at,
                    data = excluded.data,
                    updated_at = excluded.updated_at",
                params![
                    worker.id.to_string(),
                    worker.user_id.as_str(),
                    worker.worker_type.as_str(),
                    worker.status.as_str(),
                    worker.next_scheduled_at.map(format_datetime),
                    data,
                    format_datetime(worker.created_at),
                    format_datetime(worker.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_worker: {e}")))?;

        debug!(worker_id = %worker.id, status = %worker.status, "Worker saved");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Worker>, DatabaseError> {
        let workers = self
            .query_workers(
                "get_worker",
                "SELECT data FROM workers WHERE id = ?1",
                params![id.to_string()],
            )
            .await?;
        Ok(workers.into_iter().next())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Worker>, DatabaseError> {
        self.query_workers(
            "list_due",
            "SELECT data FROM workers
             WHERE status = ?1 AND next_scheduled_at IS NOT NULL AND next_scheduled_at <= ?2
             ORDER BY next_scheduled_at ASC",
            params![WorkerStatus::Active.as_str(), format_datetime(now)],
        )
        .await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Worker>, DatabaseError> {
        self.query_workers(
            "list_for_user",
            "SELECT data FROM workers WHERE user_id = ?1 ORDER BY created_at DESC",
            params![user_id],
        )
        .await
    }
}
