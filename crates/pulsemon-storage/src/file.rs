//! JSON snapshot backend.
//!
//! State lives in a [`MemoryStore`]; the whole snapshot is rewritten to disk
//! either after every write or periodically by [`FileStore::spawn_flusher`],
//! and once more on [`close`](MetricStore::close).

use crate::accumulator::MetricSnapshot;
use crate::error::{Result, StorageError};
use crate::memory::MemoryStore;
use crate::MetricStore;
use pulsemon_common::types::{Metric, MetricKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct FileStore {
    memory: MemoryStore,
    path: PathBuf,
    write_through: bool,
    // Serializes writers of the snapshot file.
    flush_lock: Mutex<()>,
    closed: AtomicBool,
}

impl FileStore {
    /// Opens (creating if needed) the snapshot file at `path`.
    ///
    /// With `restore` set, a previous snapshot is loaded; an empty file means
    /// no prior state. With `write_through` set, every successful write is
    /// flushed immediately.
    pub fn open(path: &Path, restore: bool, write_through: bool) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(StorageError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty snapshot path"),
            ));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        // Fail early if the file cannot be created or written.
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;

        let snapshot = if restore {
            Self::load(path)?
        } else {
            MetricSnapshot::default()
        };
        tracing::info!(
            path = %path.display(),
            restored = snapshot.len(),
            write_through,
            "Opened snapshot file"
        );

        Ok(Self {
            memory: MemoryStore::with_snapshot(snapshot),
            path: path.to_path_buf(),
            write_through,
            flush_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    fn load(path: &Path) -> Result<MetricSnapshot> {
        let bytes = std::fs::read(path).map_err(|e| StorageError::io(path, e))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(MetricSnapshot::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_write_through(&self) -> bool {
        self.write_through
    }

    /// Rewrites the whole snapshot file with the current state.
    pub fn flush(&self) -> Result<()> {
        let snapshot = self.memory.snapshot();
        self.write_snapshot(&snapshot)
    }

    // Lock order: memory state, then `flush_lock`.
    fn write_snapshot(&self, snapshot: &MetricSnapshot) -> Result<()> {
        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let json = serde_json::to_vec_pretty(snapshot)?;
        std::fs::write(&self.path, json).map_err(|e| StorageError::io(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), metrics = snapshot.len(), "Snapshot written");
        Ok(())
    }

    /// Starts the periodic flusher. The task exits once `shutdown` is
    /// cancelled; the final snapshot is left to [`close`](MetricStore::close).
    pub fn spawn_flusher(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            // The first tick completes immediately.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let flusher = Arc::clone(&store);
                        match tokio::task::spawn_blocking(move || flusher.flush()).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::error!(error = %e, "Periodic snapshot failed"),
                            Err(e) => tracing::error!(error = %e, "Snapshot task panicked"),
                        }
                    }
                }
            }
            tracing::debug!("Snapshot flusher stopped");
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// In write-through mode a write only sticks if the snapshot reaches
    /// disk, so a failed save can be retried without double counting.
    fn write(&self, batch: &[Metric]) -> Result<Vec<Metric>> {
        self.check_open()?;
        if self.write_through {
            self.memory
                .save_many_with(batch, |snapshot| self.write_snapshot(snapshot))
        } else {
            self.memory.save_many(batch)
        }
    }
}

impl MetricStore for FileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn save(&self, metric: &Metric) -> Result<Metric> {
        let mut merged = self.write(std::slice::from_ref(metric))?;
        merged.pop().ok_or(StorageError::NotFound {
            kind: metric.kind,
            id: metric.id.clone(),
        })
    }

    fn save_many(&self, batch: &[Metric]) -> Result<Vec<Metric>> {
        self.write(batch)
    }

    fn get(&self, kind: MetricKind, id: &str) -> Result<Metric> {
        self.memory.get(kind, id)
    }

    fn get_all(&self) -> Result<Vec<Metric>> {
        self.memory.get_all()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush()?;
        tracing::info!(path = %self.path.display(), "Final snapshot written");
        Ok(())
    }
}
