#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use pulsemon_agent::config::AgentConfig;
use pulsemon_common::codec::gunzip;
use pulsemon_common::signing::SIGNATURE_HEADER;
use pulsemon_common::types::Metric;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One request as seen by the capture server.
#[derive(Debug, Clone)]
pub struct Captured {
    pub content_encoding: Option<String>,
    pub signature: Option<String>,
    pub raw_body: Vec<u8>,
}

impl Captured {
    pub fn metrics(&self) -> Vec<Metric> {
        let json = gunzip(&self.raw_body).expect("body should be gzip");
        serde_json::from_slice(&json).expect("body should be a metric array")
    }
}

#[derive(Clone, Default)]
struct CaptureState {
    requests: Arc<Mutex<Vec<Captured>>>,
    failures_left: Arc<AtomicUsize>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// A local `/updates/` endpoint that records every request and answers 500
/// to the first `fail_first` of them. With a delay it also tracks how many
/// requests were in flight at once.
pub struct CaptureServer {
    pub addr: SocketAddr,
    state: CaptureState,
}

async fn capture(State(state): State<CaptureState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(Captured {
        content_encoding: header("content-encoding"),
        signature: header(SIGNATURE_HEADER),
        raw_body: body.to_vec(),
    });

    let fail = state
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if fail {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

impl CaptureServer {
    pub async fn start(fail_first: usize) -> Self {
        Self::start_with_delay(fail_first, Duration::ZERO).await
    }

    pub async fn start_with_delay(fail_first: usize, delay: Duration) -> Self {
        let state = CaptureState {
            requests: Arc::default(),
            failures_left: Arc::new(AtomicUsize::new(fail_first)),
            delay,
            in_flight: Arc::default(),
            peak_in_flight: Arc::default(),
        };
        let app = Router::new()
            .route("/updates/", post(capture))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Waits until at least `n` requests arrived, or panics after 10s.
    pub async fn wait_for(&self, n: usize) -> Vec<Captured> {
        for _ in 0..200 {
            let seen = self.requests();
            if seen.len() >= n {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("expected {n} request(s), got {}", self.requests().len());
    }

    pub fn config(&self) -> AgentConfig {
        AgentConfig {
            server_endpoint: self.addr.to_string(),
            retry_delays_ms: vec![10, 10, 10],
            request_timeout_secs: 2,
            ..AgentConfig::default()
        }
    }
}
