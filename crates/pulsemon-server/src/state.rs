use pulsemon_storage::{BackendKind, MetricStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub backend: BackendKind,
    /// HMAC key shared with agents; `None` disables signing.
    pub secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(store: Arc<dyn MetricStore>, backend: BackendKind, secret: Option<&str>) -> Self {
        Self {
            store,
            backend,
            secret: secret.filter(|s| !s.is_empty()).map(Arc::from),
        }
    }
}
