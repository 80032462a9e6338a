use pulsemon_common::types::MetricKind;

/// Why a single metric was rejected by the accumulator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Invalid {
    #[error("metric id is empty")]
    EmptyId,

    #[error("counter has no delta")]
    MissingDelta,

    #[error("gauge has no value")]
    MissingValue,

    #[error("gauge value {0} is not finite")]
    NonFiniteValue(f64),

    #[error("counter overflow adding {delta} to {current}")]
    CounterOverflow { current: i64, delta: i64 },
}

/// A rejected entry together with its position in the request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("#{index} {kind} '{id}': {problem}")]
pub struct Violation {
    pub index: usize,
    pub id: String,
    pub kind: MetricKind,
    pub problem: Invalid,
}

/// Errors returned by every [`MetricStore`](crate::MetricStore) backend.
///
/// # Examples
///
/// ```rust
/// use pulsemon_common::types::MetricKind;
/// use pulsemon_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     kind: MetricKind::Gauge,
///     id: "missing".to_string(),
/// };
/// assert!(err.to_string().contains("missing"));
/// assert!(err.is_client_error());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A single update failed validation.
    #[error("Storage: invalid metric {0}")]
    Validation(Violation),

    /// One or more entries of a batch failed validation; nothing was applied.
    #[error("Storage: batch rejected: {}", join(.0))]
    InvalidBatch(Vec<Violation>),

    #[error("Storage: {kind} '{id}' not found")]
    NotFound { kind: MetricKind, id: String },

    /// The operation exists only on some backends (e.g. `ping`).
    #[error("Storage: {op} is not supported by the {backend} backend")]
    NotApplicable {
        backend: &'static str,
        op: &'static str,
    },

    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage: I/O error on '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Storage: backend is closed")]
    Closed,

    #[error("Storage: deadline passed before {op}")]
    DeadlineExceeded { op: &'static str },
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StorageError {
    /// Builds the rejection for a request of `len` entries.
    pub(crate) fn rejected(mut violations: Vec<Violation>, len: usize) -> Self {
        if len == 1 && violations.len() == 1 {
            StorageError::Validation(violations.remove(0))
        } else {
            StorageError::InvalidBatch(violations)
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// True for errors caused by the request rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::Validation(_)
                | StorageError::InvalidBatch(_)
                | StorageError::NotFound { .. }
        )
    }

    /// True when retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Sqlite(e) => crate::sqlite::is_transient(e),
            _ => false,
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
