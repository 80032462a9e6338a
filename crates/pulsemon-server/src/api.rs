use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pulsemon_common::types::{Metric, MetricBatch, MetricKey, MetricKind};
use pulsemon_storage::{BackendKind, MetricStore, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Error envelope returned by every failing endpoint.
#[derive(Serialize)]
pub struct ApiError {
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "unknown_metric_type" => 1005,
        "invalid_value" => 1006,
        "invalid_signature" => 1007,
        "payload_too_large" => 1413,
        "invalid_metric" => 1101,
        "invalid_batch" => 1102,
        "internal_error" => 1500,
        "storage_error" => 1501,
        "not_applicable" => 1502,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiError {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
        }),
    )
        .into_response()
}

fn storage_error_response(trace_id: &str, backend: BackendKind, err: &StorageError) -> Response {
    let (status, code) = match err {
        StorageError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_metric"),
        StorageError::InvalidBatch(_) => (StatusCode::BAD_REQUEST, "invalid_batch"),
        StorageError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        StorageError::NotApplicable { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "not_applicable")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
    };
    if status.is_server_error() {
        tracing::error!(trace_id = %trace_id, backend = %backend, error = %err, "Storage operation failed");
    }
    error_response(status, trace_id, code, &err.to_string())
}

/// Runs a store call off the async workers; the SQLite backend may sleep
/// between retries.
async fn with_store<T, F>(state: &AppState, trace_id: &str, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&dyn MetricStore) -> pulsemon_storage::Result<T> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || f(&*store)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(storage_error_response(trace_id, state.backend, &e)),
        Err(e) => {
            tracing::error!(trace_id = %trace_id, backend = %state.backend, error = %e, "Storage task failed");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "internal_error",
                "storage task failed",
            ))
        }
    }
}

/// Parses a JSON body. Failures are 400, not axum's default 422.
fn parse_json<T: DeserializeOwned>(trace_id: &str, body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            trace_id,
            "bad_request",
            &format!("invalid JSON body: {e}"),
        )
    })
}

fn parse_kind(trace_id: &str, raw: &str) -> Result<MetricKind, Response> {
    raw.parse().map_err(|e: String| {
        error_response(StatusCode::BAD_REQUEST, trace_id, "unknown_metric_type", &e)
    })
}

/// Builds a metric from the path segments of the legacy update route.
fn parse_path_metric(trace_id: &str, kind: &str, id: &str, raw: &str) -> Result<Metric, Response> {
    let kind = parse_kind(trace_id, kind)?;
    let invalid = |what: &str| {
        error_response(
            StatusCode::BAD_REQUEST,
            trace_id,
            "invalid_value",
            &format!("invalid {what} value: {raw}"),
        )
    };
    match kind {
        MetricKind::Gauge => raw
            .parse::<f64>()
            .map(|v| Metric::gauge(id, v))
            .map_err(|_| invalid("gauge")),
        MetricKind::Counter => raw
            .parse::<i64>()
            .map(|d| Metric::counter(id, d))
            .map_err(|_| invalid("counter")),
    }
}

fn text_response(metric: &Metric) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        metric.text_value().unwrap_or_default(),
    )
        .into_response()
}

async fn update_from_path(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> Response {
    let metric = match parse_path_metric(&trace_id, &kind, &id, &value) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    match with_store(&state, &trace_id, move |store| store.save(&metric)).await {
        Ok(saved) => text_response(&saved),
        Err(resp) => resp,
    }
}

async fn update_json(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    let metric: Metric = match parse_json(&trace_id, &body) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    match with_store(&state, &trace_id, move |store| store.save(&metric)).await {
        Ok(saved) => Json(saved).into_response(),
        Err(resp) => resp,
    }
}

async fn update_batch(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    let batch: MetricBatch = match parse_json(&trace_id, &body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let count = batch.len();
    match with_store(&state, &trace_id, move |store| store.save_many(&batch)).await {
        Ok(saved) => {
            tracing::debug!(trace_id = %trace_id.0, received = count, distinct = saved.len(), "Batch stored");
            Json(saved).into_response()
        }
        Err(resp) => resp,
    }
}

async fn value_from_path(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Response {
    let kind = match parse_kind(&trace_id, &kind) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match with_store(&state, &trace_id, move |store| store.get(kind, &id)).await {
        Ok(metric) => text_response(&metric),
        Err(resp) => resp,
    }
}

async fn value_json(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    let key: MetricKey = match parse_json(&trace_id, &body) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match with_store(&state, &trace_id, move |store| store.get(key.kind, &key.id)).await {
        Ok(metric) => Json(metric).into_response(),
        Err(resp) => resp,
    }
}

async fn ping(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> Response {
    match with_store(&state, &trace_id, |store| store.ping()).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(resp) => resp,
    }
}

/// Every stored metric, ordered by id and then type.
async fn list_all(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> Response {
    match with_store(&state, &trace_id, |store| store.get_all()).await {
        Ok(mut metrics) => {
            metrics.sort_by(|a, b| a.id.cmp(&b.id).then(a.kind.cmp(&b.kind)));
            Json(metrics).into_response()
        }
        Err(resp) => resp,
    }
}

pub fn metric_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_all))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/update/{kind}/{id}/{value}", post(update_from_path))
        .route("/updates/", post(update_batch))
        .route("/value/", post(value_json))
        .route("/value/{kind}/{id}", get(value_from_path))
}
