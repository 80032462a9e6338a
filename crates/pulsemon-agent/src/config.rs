use pulsemon_common::retry::{schedule_from_millis, DEFAULT_SCHEDULE_MS};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Server address, with or without an `http://` scheme.
    pub server_endpoint: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Shared HMAC key; requests are signed only when set and non-empty.
    pub secret_key: Option<String>,
    /// Maximum concurrent in-flight reports across all workers.
    pub rate_limit: Option<usize>,
    #[serde(default = "default_report_workers")]
    pub report_workers: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_report_workers() -> usize {
    1
}

fn default_request_timeout() -> u64 {
    10
}

fn default_retry_delays() -> Vec<u64> {
    DEFAULT_SCHEDULE_MS.to_vec()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_endpoint: "localhost:8080".to_string(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            secret_key: None,
            rate_limit: None,
            report_workers: default_report_workers(),
            request_timeout_secs: default_request_timeout(),
            retry_delays_ms: default_retry_delays(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_endpoint.trim().is_empty() {
            anyhow::bail!("server_endpoint must not be empty");
        }
        if self.poll_interval_secs == 0 || self.report_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs and report_interval_secs must be positive");
        }
        if self.report_workers == 0 {
            anyhow::bail!("report_workers must be at least 1");
        }
        if self.rate_limit == Some(0) {
            anyhow::bail!("rate_limit must be at least 1 when set");
        }
        Ok(())
    }

    /// Base URL of the server, e.g. `http://localhost:8080`.
    pub fn server_url(&self) -> String {
        let addr = self.server_endpoint.trim().trim_end_matches('/');
        if addr.contains("://") {
            return addr.to_string();
        }
        format!("http://{addr}")
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret_key.as_deref().filter(|s| !s.is_empty())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_schedule(&self) -> Vec<Duration> {
        schedule_from_millis(&self.retry_delays_ms)
    }
}
