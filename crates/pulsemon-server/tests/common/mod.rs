#![allow(dead_code)]

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use pulsemon_server::app;
use pulsemon_server::state::AppState;
use pulsemon_storage::{BackendKind, FileStore, MemoryStore, MetricStore, SqliteStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub store: Arc<dyn MetricStore>,
    pub app: axum::Router,
}

pub fn build_test_context(secret: Option<&str>) -> TestContext {
    build_with_backend(BackendKind::Memory, secret)
}

pub fn build_with_backend(kind: BackendKind, secret: Option<&str>) -> TestContext {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let store: Arc<dyn MetricStore> = match kind {
        BackendKind::Memory => Arc::new(MemoryStore::new()),
        BackendKind::File => Arc::new(
            FileStore::open(&temp_dir.path().join("metrics.json"), true, true)
                .expect("file store should open"),
        ),
        BackendKind::Relational => Arc::new(
            SqliteStore::open(
                &temp_dir.path().join("metrics.db"),
                Duration::from_secs(1),
                Vec::new(),
            )
            .expect("sqlite store should open"),
        ),
    };
    let state = AppState::new(store.clone(), kind, secret);
    let app = app::build_http_app(state);
    TestContext {
        temp_dir,
        store,
        app,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response should be JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
    }
}

pub async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder
        .body(Body::from(body))
        .expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn request_json(app: &axum::Router, method: &str, uri: &str, body: Value) -> TestResponse {
    send(
        app,
        method,
        uri,
        &[("Content-Type", "application/json")],
        body.to_string().into_bytes(),
    )
    .await
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> TestResponse {
    send(app, method, uri, &[], Vec::new()).await
}
