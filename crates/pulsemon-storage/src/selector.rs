//! Startup backend selection: SQLite, then snapshot file, then memory.
//!
//! The choice is made once. A database that goes away later is reported as
//! errors by the SQLite backend; the process never switches backends.

use crate::file::FileStore;
use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;
use crate::MetricStore;
use pulsemon_common::retry::{schedule_from_millis, DEFAULT_SCHEDULE_MS};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Relational,
    File,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Relational => "relational",
            BackendKind::File => "file",
            BackendKind::Memory => "memory",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to [`select_backend`]. Empty paths count as not configured.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub database_path: Option<PathBuf>,
    pub file_storage_path: Option<PathBuf>,
    /// Snapshot period of the file backend; zero writes after every update.
    pub store_interval: Duration,
    pub restore: bool,
    pub connect_timeout: Duration,
    pub retry_schedule: Vec<Duration>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: None,
            file_storage_path: None,
            store_interval: Duration::from_secs(300),
            restore: true,
            connect_timeout: Duration::from_secs(10),
            retry_schedule: schedule_from_millis(&DEFAULT_SCHEDULE_MS),
        }
    }
}

pub struct SelectedBackend {
    pub kind: BackendKind,
    pub store: Arc<dyn MetricStore>,
    /// Set when the file backend was chosen, for the periodic flusher.
    pub file: Option<Arc<FileStore>>,
    store_interval: Duration,
}

impl SelectedBackend {
    fn new(kind: BackendKind, store: Arc<dyn MetricStore>) -> Self {
        Self {
            kind,
            store,
            file: None,
            store_interval: Duration::ZERO,
        }
    }

    /// Starts the snapshot flusher when the file backend runs in periodic
    /// mode; otherwise there is nothing to run.
    pub fn spawn_flusher(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        match &self.file {
            Some(file) if !file.is_write_through() => {
                Some(file.spawn_flusher(self.store_interval, shutdown))
            }
            _ => None,
        }
    }
}

fn configured(path: &Option<PathBuf>) -> Option<PathBuf> {
    path.clone().filter(|p| !p.as_os_str().is_empty())
}

/// Picks the first backend that can be brought up.
pub async fn select_backend(opts: &StorageOptions) -> SelectedBackend {
    if let Some(path) = configured(&opts.database_path) {
        let timeout = opts.connect_timeout;
        let schedule = opts.retry_schedule.clone();
        let db_path = path.clone();
        // A blocking task cannot be aborted; it checks the deadline itself.
        let deadline = std::time::Instant::now() + timeout;
        let opening = tokio::task::spawn_blocking(move || {
            SqliteStore::open_before(&db_path, timeout, schedule, deadline)
        });
        match tokio::time::timeout(timeout, opening).await {
            Ok(Ok(Ok(store))) => {
                tracing::info!(path = %path.display(), "Using relational metric storage");
                return SelectedBackend::new(BackendKind::Relational, Arc::new(store));
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(path = %path.display(), error = %e, "Database unavailable, falling back");
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "Database open task failed, falling back");
            }
            Err(_) => {
                tracing::warn!(
                    path = %path.display(),
                    timeout_secs = timeout.as_secs(),
                    "Database did not answer in time, falling back"
                );
            }
        }
    }

    if let Some(path) = configured(&opts.file_storage_path) {
        let write_through = opts.store_interval.is_zero();
        match FileStore::open(&path, opts.restore, write_through) {
            Ok(file) => {
                tracing::info!(path = %path.display(), "Using file snapshot metric storage");
                let file = Arc::new(file);
                return SelectedBackend {
                    kind: BackendKind::File,
                    store: file.clone(),
                    file: Some(file),
                    store_interval: opts.store_interval,
                };
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Snapshot file unavailable, falling back");
            }
        }
    }

    tracing::info!("Using in-memory metric storage");
    SelectedBackend::new(BackendKind::Memory, Arc::new(MemoryStore::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options() -> StorageOptions {
        StorageOptions {
            connect_timeout: Duration::from_secs(2),
            retry_schedule: Vec::new(),
            ..StorageOptions::default()
        }
    }

    #[tokio::test]
    async fn nothing_configured_means_memory() {
        let selected = select_backend(&options()).await;
        assert_eq!(selected.kind, BackendKind::Memory);
        assert!(selected.spawn_flusher(CancellationToken::new()).is_none());
    }

    #[tokio::test]
    async fn database_wins_when_reachable() {
        let dir = TempDir::new().unwrap();
        let opts = StorageOptions {
            database_path: Some(dir.path().join("metrics.db")),
            file_storage_path: Some(dir.path().join("metrics.json")),
            ..options()
        };
        let selected = select_backend(&opts).await;
        assert_eq!(selected.kind, BackendKind::Relational);
        selected.store.ping().unwrap();
    }

    #[tokio::test]
    async fn unreachable_database_falls_back_to_file() {
        let dir = TempDir::new().unwrap();
        let opts = StorageOptions {
            // A directory cannot be opened as a database file.
            database_path: Some(dir.path().to_path_buf()),
            file_storage_path: Some(dir.path().join("metrics.json")),
            ..options()
        };
        let selected = select_backend(&opts).await;
        assert_eq!(selected.kind, BackendKind::File);
        assert!(selected.file.is_some());
        assert!(selected.spawn_flusher(CancellationToken::new()).is_some());
    }

    #[tokio::test]
    async fn unusable_file_falls_back_to_memory() {
        let dir = TempDir::new().unwrap();
        let opts = StorageOptions {
            database_path: Some(PathBuf::new()),
            file_storage_path: Some(dir.path().to_path_buf()),
            ..options()
        };
        assert_eq!(select_backend(&opts).await.kind, BackendKind::Memory);
    }

    #[tokio::test]
    async fn zero_interval_selects_write_through() {
        let dir = TempDir::new().unwrap();
        let opts = StorageOptions {
            file_storage_path: Some(dir.path().join("metrics.json")),
            store_interval: Duration::ZERO,
            ..options()
        };
        let selected = select_backend(&opts).await;
        assert_eq!(selected.kind, BackendKind::File);
        assert!(selected.file.as_ref().unwrap().is_write_through());
        assert!(selected.spawn_flusher(CancellationToken::new()).is_none());
    }
}
