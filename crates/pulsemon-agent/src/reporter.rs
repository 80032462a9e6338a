//! Delivery of metric batches to the server.
//!
//! A batch is encoded as a JSON array, gzip-compressed, optionally signed
//! over the compressed bytes and POSTed to `{server}/updates/`. Transport
//! failures and non-2xx answers are retried on the configured schedule.

use crate::config::AgentConfig;
use pulsemon_common::codec::{self, CodecError};
use pulsemon_common::retry::{retry, RetryError};
use pulsemon_common::signing::{self, SIGNATURE_HEADER};
use pulsemon_common::types::Metric;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Compress(#[from] CodecError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl ReportError {
    /// Transport errors and unexpected statuses are worth another attempt;
    /// encoding problems are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReportError::Http(_) | ReportError::Status { .. })
    }
}

/// A request body ready to send.
#[derive(Debug, Clone)]
pub struct Payload {
    pub body: Vec<u8>,
    pub signature: Option<String>,
}

pub struct Reporter {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    schedule: Vec<Duration>,
    limiter: Option<Arc<Semaphore>>,
}

impl Reporter {
    pub fn new(config: &AgentConfig) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/updates/", config.server_url()),
            secret: config.secret().map(str::to_string),
            schedule: config.retry_schedule(),
            limiter: config.rate_limit.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// JSON, then gzip, then the HMAC of the compressed bytes.
    pub fn encode(&self, batch: &[Metric]) -> Result<Payload, ReportError> {
        let json = serde_json::to_vec(batch)?;
        let body = codec::gzip(&json)?;
        let signature = self
            .secret
            .as_deref()
            .map(|secret| signing::sign(secret, &body));
        Ok(Payload { body, signature })
    }

    async fn post(&self, payload: &Payload) -> Result<(), ReportError> {
        // Held only for the request itself, not across retry pauses.
        let _permit = match &self.limiter {
            Some(limiter) => limiter.acquire().await.ok(),
            None => None,
        };

        let mut request = self
            .client
            .post(self.url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(payload.body.clone());
        if let Some(signature) = &payload.signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(ReportError::Status { status, body })
    }

    /// Sends one batch. Empty batches are skipped.
    ///
    /// On failure the error reports how many POSTs were attempted; zero means
    /// the batch could not be encoded.
    pub async fn send(&self, batch: &[Metric]) -> Result<(), RetryError<ReportError>> {
        if batch.is_empty() {
            return Ok(());
        }
        let payload = self
            .encode(batch)
            .map_err(|source| RetryError { attempts: 0, source })?;

        retry(&self.schedule, ReportError::is_transient, || self.post(&payload)).await?;
        tracing::debug!(count = batch.len(), bytes = payload.body.len(), "Batch delivered");
        Ok(())
    }
}
