//! Versioned schema migrations for the SQLite backend.
//!
//! Applied versions are recorded in `schema_migrations`; each pending
//! migration runs in its own transaction together with its bookkeeping row.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    sql: &'static str,
}

const M001_CREATE_METRICS: Migration = Migration {
    version: 1,
    name: "m001_create_metrics",
    sql: "
CREATE TABLE IF NOT EXISTS metrics (
    id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('gauge', 'counter')),
    delta INTEGER NULL,
    value REAL NULL,
    PRIMARY KEY (id, kind)
);
",
};

const M002_METRICS_UPDATED_AT: Migration = Migration {
    version: 2,
    name: "m002_metrics_updated_at",
    sql: "ALTER TABLE metrics ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0;",
};

pub const MIGRATIONS: &[Migration] = &[M001_CREATE_METRICS, M002_METRICS_UPDATED_AT];

const BOOKKEEPING_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL
);
";

/// Applies every migration newer than the recorded version. Returns how many
/// were applied.
pub fn run(conn: &mut Connection) -> Result<usize> {
    conn.execute_batch(BOOKKEEPING_SCHEMA)?;
    let current = current_version(conn)?;

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.name,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        tx.commit()?;
        tracing::info!(version = migration.version, name = migration.name, "Applied migration");
        applied += 1;
    }
    Ok(applied)
}

/// Highest applied version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}
