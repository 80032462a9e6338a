//! Accumulating metric storage.
//!
//! Every backend implements [`MetricStore`] on top of the same merge rules in
//! [`accumulator`]: gauges keep the last value, counters keep a running
//! total. The backend is chosen once at startup by
//! [`selector::select_backend`], trying SQLite, then a JSON snapshot file,
//! then plain memory.

pub mod accumulator;
pub mod error;
pub mod file;
pub mod memory;
pub mod migration;
pub mod selector;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use accumulator::MetricSnapshot;
pub use error::{Result, StorageError};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use selector::{select_backend, BackendKind, SelectedBackend, StorageOptions};
pub use sqlite::SqliteStore;

use pulsemon_common::types::{Metric, MetricKind};

/// Persistence backend for accumulated metrics.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because HTTP handlers call them concurrently. All methods are
/// synchronous; each holds the backend lock (or one transaction) for its
/// whole duration, so a batch is observed either entirely or not at all.
pub trait MetricStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn backend(&self) -> &'static str;

    /// Merges one metric and returns its post-merge state. For counters that
    /// is the new total, not the delta that was sent.
    fn save(&self, metric: &Metric) -> Result<Metric>;

    /// Merges a whole batch as one unit. See [`accumulator::merge`].
    fn save_many(&self, batch: &[Metric]) -> Result<Vec<Metric>>;

    /// Returns [`StorageError::NotFound`] when the metric was never written.
    fn get(&self, kind: MetricKind, id: &str) -> Result<Metric>;

    /// Every stored metric, in no particular order.
    fn get_all(&self) -> Result<Vec<Metric>>;

    /// Checks that the backing database answers.
    fn ping(&self) -> Result<()> {
        Err(StorageError::NotApplicable {
            backend: self.backend(),
            op: "ping",
        })
    }

    /// Releases resources. Further calls may fail with
    /// [`StorageError::Closed`].
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
