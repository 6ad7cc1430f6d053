//! Version-tracked database migrations for the libSQL backend.
//!
//! Migrations are append-only; `run_migrations()` applies the ones newer than
//! the version recorded in `_migrations`.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS workers (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                worker_type TEXT NOT NULL,
                status TEXT NOT NULL,
                next_scheduled_at TEXT,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_workers_user ON workers(user_id);
            CREATE INDEX IF NOT EXISTS idx_workers_status ON workers(status);
        "#,
    },
    Migration {
        version: 2,
        name: "due_sweep_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_workers_due
                ON workers(status, next_scheduled_at);
        "#,
    },
];

/// Apply every migration newer than the recorded schema version.
///
/// Each migration runs in one transaction together with its `_migrations`
/// row, so a failed step leaves the version unchanged. Returns the schema
/// version after the run.
pub async fn run_migrations(conn: &Connection) -> Result<i64, DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let mut version = schema_version(conn).await?;
    for migration in MIGRATIONS.iter().filter(move |m| m.version > version) {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO _migrations (version, name) VALUES ({}, '{}');\nCOMMIT;",
            migration.sql, migration.version, migration.name
        );
        if let Err(e) = conn.execute_batch(&batch).await {
            // Leave the connection usable if the batch stopped mid-transaction.
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::Migration(format!(
                "V{} ({}) failed: {e}",
                migration.version, migration.name
            )));
        }
        version = migration.version;
    }

    tracing::debug!(version, "Schema up to date");
    Ok(version)
}

/// Highest applied migration, 0 for a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Migration(format!("Failed to read schema version: {e}"));
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(read)?;
    match rows.next().await.map_err(read)? {
        Some(row) => row.get::<i64>(0).map_err(read),
        None => Ok(0),
    }
}
