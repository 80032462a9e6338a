//! Relational backend on SQLite.
//!
//! One row per `(id, kind)`. Counters are accumulated by the database in a
//! single upsert statement, so concurrent writers never lose increments.

use crate::accumulator::{self, Latest};
use crate::error::{Invalid, Result, StorageError, Violation};
use crate::{migration, MetricStore};
use pulsemon_common::retry::{retry_blocking, RetryError};
use pulsemon_common::types::{Metric, MetricKind};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

// The WHERE clause skips the update (and so returns no row) when the sum
// would leave the integer range; SQLite would otherwise store a REAL.
const UPSERT_COUNTER: &str = "
INSERT INTO metrics (id, kind, delta, value, updated_at) VALUES (?1, 'counter', ?2, NULL, ?3)
ON CONFLICT (id, kind) DO UPDATE SET
    delta = metrics.delta + excluded.delta,
    updated_at = excluded.updated_at
WHERE typeof(metrics.delta + excluded.delta) = 'integer'
RETURNING delta";

const UPSERT_GAUGE: &str = "
INSERT INTO metrics (id, kind, delta, value, updated_at) VALUES (?1, 'gauge', NULL, ?2, ?3)
ON CONFLICT (id, kind) DO UPDATE SET
    value = excluded.value,
    updated_at = excluded.updated_at
RETURNING value";

/// Whether a driver error is worth retrying: the database is busy or locked
/// by another connection, or the file could not be opened or read.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
        ),
        _ => false,
    }
}

pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    schedule: Vec<Duration>,
}

impl SqliteStore {
    /// Opens the database, checks it answers and brings the schema up to
    /// date. `busy_timeout` bounds how long a statement waits on a lock.
    pub fn open(path: &Path, busy_timeout: Duration, schedule: Vec<Duration>) -> Result<Self> {
        Self::open_inner(path, busy_timeout, schedule, None)
    }

    /// Like [`SqliteStore::open`], but gives up once `deadline` passes: no
    /// further connection attempt starts and the schema is left untouched.
    /// Lock waits are capped to the time remaining.
    pub fn open_before(
        path: &Path,
        busy_timeout: Duration,
        schedule: Vec<Duration>,
        deadline: Instant,
    ) -> Result<Self> {
        Self::open_inner(path, busy_timeout, schedule, Some(deadline))
    }

    fn open_inner(
        path: &Path,
        busy_timeout: Duration,
        schedule: Vec<Duration>,
        deadline: Option<Instant>,
    ) -> Result<Self> {
        let remaining = |op: &'static str| -> Result<Duration> {
            match deadline {
                None => Ok(busy_timeout),
                Some(deadline) => deadline
                    .checked_duration_since(Instant::now())
                    .filter(|left| !left.is_zero())
                    .map(|left| left.min(busy_timeout))
                    .ok_or(StorageError::DeadlineExceeded { op }),
            }
        };

        let mut conn = retry_blocking(&schedule, StorageError::is_transient, || {
            remaining("open")?;
            Ok(Connection::open(path)?)
        })
        .map_err(|e| exhausted("open", e))?;
        conn.busy_timeout(remaining("probe")?)?;
        // In-memory databases report "memory" here; that's fine.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        conn.busy_timeout(remaining("migrate")?)?;
        let applied = migration::run(&mut conn)?;
        conn.busy_timeout(busy_timeout)?;
        tracing::info!(path = %path.display(), applied, "Opened SQLite metric store");
        Ok(Self::from_connection(conn, schedule))
    }

    fn from_connection(conn: Connection, schedule: Vec<Duration>) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            schedule,
        }
    }

    /// In-memory database with the full schema, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::run(&mut conn)?;
        Ok(Self::from_connection(conn, Vec::new()))
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` on the open connection, retrying transient driver errors on
    /// the configured schedule.
    fn with_conn<T, F>(&self, op: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> Result<T>,
    {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;
        retry_blocking(&self.schedule, StorageError::is_transient, || f(conn))
            .map_err(|e| exhausted(op, e))
    }

    fn apply(conn: &mut Connection, batch: &[Metric]) -> Result<Vec<Metric>> {
        let now = chrono::Utc::now().timestamp_millis();
        let tx = conn.transaction()?;
        let mut order = Latest::default();
        let mut latest: Vec<Option<Metric>> = Vec::new();
        let mut violations = Vec::new();
        {
            let mut counter_stmt = tx.prepare_cached(UPSERT_COUNTER)?;
            let mut gauge_stmt = tx.prepare_cached(UPSERT_GAUGE)?;
            for (index, m) in batch.iter().enumerate() {
                let merged = match (m.kind, m.delta, m.value) {
                    (MetricKind::Counter, Some(delta), _) => {
                        let total: Option<i64> = counter_stmt
                            .query_row(rusqlite::params![&m.id, delta, now], |row| row.get(0))
                            .optional()?;
                        match total {
                            Some(total) => Metric::counter(m.id.as_str(), total),
                            None => {
                                let current = Self::stored_delta(&tx, &m.id)?;
                                violations.push(Violation {
                                    index,
                                    id: m.id.clone(),
                                    kind: m.kind,
                                    problem: Invalid::CounterOverflow { current, delta },
                                });
                                continue;
                            }
                        }
                    }
                    (MetricKind::Gauge, _, Some(value)) => {
                        let stored: f64 = gauge_stmt
                            .query_row(rusqlite::params![&m.id, value, now], |row| row.get(0))?;
                        Metric::gauge(m.id.as_str(), stored)
                    }
                    // Shapes were checked by `accumulator::validate`.
                    _ => continue,
                };
                let slot = order.touch(m.kind, &m.id);
                if slot == latest.len() {
                    latest.push(None);
                }
                latest[slot] = Some(merged);
            }
        }

        if !violations.is_empty() {
            // Dropping `tx` rolls back everything written above.
            return Err(StorageError::rejected(violations, batch.len()));
        }
        tx.commit()?;
        debug_assert_eq!(order.len(), latest.len());
        Ok(latest.into_iter().flatten().collect())
    }

    fn stored_delta(conn: &Connection, id: &str) -> Result<i64> {
        let delta = conn
            .query_row(
                "SELECT delta FROM metrics WHERE id = ?1 AND kind = 'counter'",
                [id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        Ok(delta.unwrap_or(0))
    }
}

fn exhausted(op: &'static str, err: RetryError<StorageError>) -> StorageError {
    if err.attempts > 1 {
        tracing::error!(op, attempts = err.attempts, error = %err.source, "SQLite operation failed after retries");
    }
    err.source
}

fn row_to_metric(row: &Row<'_>) -> rusqlite::Result<Metric> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let kind: MetricKind = kind.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Metric {
        id,
        kind,
        delta: row.get(2)?,
        value: row.get(3)?,
    })
}

impl MetricStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn save(&self, metric: &Metric) -> Result<Metric> {
        let mut merged = self.save_many(std::slice::from_ref(metric))?;
        merged.pop().ok_or(StorageError::NotFound {
            kind: metric.kind,
            id: metric.id.clone(),
        })
    }

    fn save_many(&self, batch: &[Metric]) -> Result<Vec<Metric>> {
        accumulator::validate(batch)?;
        self.with_conn("save_many", |conn| Self::apply(conn, batch))
    }

    fn get(&self, kind: MetricKind, id: &str) -> Result<Metric> {
        let found = self.with_conn("get", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, kind, delta, value FROM metrics WHERE id = ?1 AND kind = ?2",
            )?;
            Ok(stmt
                .query_row(rusqlite::params![id, kind.as_str()], row_to_metric)
                .optional()?)
        })?;
        found.ok_or_else(|| StorageError::NotFound {
            kind,
            id: id.to_string(),
        })
    }

    fn get_all(&self) -> Result<Vec<Metric>> {
        self.with_conn("get_all", |conn| {
            let mut stmt =
                conn.prepare_cached("SELECT id, kind, delta, value FROM metrics ORDER BY id, kind")?;
            let rows = stmt.query_map([], row_to_metric)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn ping(&self) -> Result<()> {
        self.with_conn("ping", |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    fn close(&self) -> Result<()> {
        if let Some(conn) = self.lock().take() {
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
            tracing::info!("SQLite metric store closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn transient_classification() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(is_transient(&busy));
        assert!(!is_transient(&constraint));
        assert!(!is_transient(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[test]
    fn counter_upsert_returns_new_total() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.save(&Metric::counter("requests", 5)).unwrap().delta, Some(5));
        assert_eq!(store.save(&Metric::counter("requests", 3)).unwrap().delta, Some(8));
    }

    #[test]
    fn gauge_and_counter_rows_keep_other_column_null() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_many(&[Metric::gauge("x", 2.5), Metric::counter("x", 1)])
            .unwrap();
        let gauge = store.get(MetricKind::Gauge, "x").unwrap();
        assert_eq!((gauge.delta, gauge.value), (None, Some(2.5)));
        let counter = store.get(MetricKind::Counter, "x").unwrap();
        assert_eq!((counter.delta, counter.value), (Some(1), None));
    }

    #[test]
    fn overflow_rolls_back_the_transaction() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&Metric::counter("big", i64::MAX)).unwrap();

        let err = store
            .save_many(&[Metric::gauge("temp", 1.0), Metric::counter("big", 1)])
            .unwrap_err();
        match err {
            StorageError::InvalidBatch(v) => assert_eq!(
                v[0].problem,
                Invalid::CounterOverflow {
                    current: i64::MAX,
                    delta: 1
                }
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            store.get(MetricKind::Gauge, "temp"),
            Err(StorageError::NotFound { .. })
        ));
        assert_eq!(store.get(MetricKind::Counter, "big").unwrap().delta, Some(i64::MAX));
    }

    #[test]
    fn batch_returns_one_entry_per_key_in_first_appearance_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let out = store
            .save_many(&[
                Metric::counter("b", 1),
                Metric::gauge("a", 1.0),
                Metric::counter("b", 2),
                Metric::gauge("a", 4.0),
            ])
            .unwrap();
        assert_eq!(out, vec![Metric::counter("b", 3), Metric::gauge("a", 4.0)]);
    }

    #[test]
    fn concurrent_counter_writers_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(
            SqliteStore::open(&dir.path().join("m.db"), Duration::from_secs(5), Vec::new())
                .unwrap(),
        );
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store.save(&Metric::counter("hits", 1)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get(MetricKind::Counter, "hits").unwrap().delta, Some(200));
    }

    #[test]
    fn state_survives_reopen_and_close_is_final() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.db");
        let store = SqliteStore::open(&path, Duration::from_secs(1), Vec::new()).unwrap();
        store.save(&Metric::counter("hits", 4)).unwrap();
        store.ping().unwrap();
        store.close().unwrap();
        assert!(matches!(store.ping(), Err(StorageError::Closed)));

        let reopened = SqliteStore::open(&path, Duration::from_secs(1), Vec::new()).unwrap();
        assert_eq!(reopened.get(MetricKind::Counter, "hits").unwrap().delta, Some(4));
    }

    #[test]
    fn open_gives_up_after_deadline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.db");
        let err = SqliteStore::open_before(
            &path,
            Duration::from_secs(1),
            vec![Duration::from_millis(1)],
            Instant::now(),
        )
        .err()
        .expect("open should be refused");
        assert!(matches!(err, StorageError::DeadlineExceeded { op: "open" }));
        assert!(!path.exists());

        let store = SqliteStore::open_before(
            &path,
            Duration::from_secs(1),
            Vec::new(),
            Instant::now() + Duration::from_secs(30),
        )
        .unwrap();
        store.ping().unwrap();
    }
}
