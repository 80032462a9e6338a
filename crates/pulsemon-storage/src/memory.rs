use crate::accumulator::{self, MetricSnapshot};
use crate::error::{Result, StorageError};
use crate::MetricStore;
use pulsemon_common::types::{Metric, MetricKind};
use std::sync::{Mutex, MutexGuard};

/// In-process backend; state is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MetricSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: MetricSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    /// Lock the snapshot, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, MetricSnapshot> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> MetricSnapshot {
        self.lock().clone()
    }

    /// Merges `batch` and hands the new state to `persist` while the lock is
    /// still held. If `persist` fails the merge is undone.
    pub(crate) fn save_many_with<F>(&self, batch: &[Metric], persist: F) -> Result<Vec<Metric>>
    where
        F: FnOnce(&MetricSnapshot) -> Result<()>,
    {
        let mut state = self.lock();
        let before = state.clone();
        let merged = accumulator::merge(&mut state, batch)?;
        if let Err(e) = persist(&state) {
            *state = before;
            return Err(e);
        }
        Ok(merged)
    }
}

impl MetricStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn save(&self, metric: &Metric) -> Result<Metric> {
        let mut merged = self.save_many(std::slice::from_ref(metric))?;
        merged.pop().ok_or(StorageError::NotFound {
            kind: metric.kind,
            id: metric.id.clone(),
        })
    }

    fn save_many(&self, batch: &[Metric]) -> Result<Vec<Metric>> {
        let mut state = self.lock();
        accumulator::merge(&mut state, batch)
    }

    fn get(&self, kind: MetricKind, id: &str) -> Result<Metric> {
        self.lock().get(kind, id).ok_or_else(|| StorageError::NotFound {
            kind,
            id: id.to_string(),
        })
    }

    fn get_all(&self) -> Result<Vec<Metric>> {
        Ok(self.lock().metrics())
    }
}
