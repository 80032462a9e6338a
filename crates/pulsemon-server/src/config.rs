use pulsemon_common::retry::{schedule_from_millis, DEFAULT_SCHEDULE_MS};
use pulsemon_storage::StorageOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Shared HMAC key. When set, request bodies must carry a matching
    /// `HashSHA256` header and responses are signed.
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file; tried first when set.
    #[serde(default)]
    pub database_path: Option<String>,
    /// JSON snapshot file; used when the database is unavailable.
    #[serde(default)]
    pub file_storage_path: Option<String>,
    /// Snapshot period in seconds; 0 writes after every update.
    #[serde(default = "default_store_interval_secs")]
    pub store_interval_secs: u64,
    #[serde(default = "default_restore")]
    pub restore: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,
}

fn default_http_port() -> u16 {
    8080
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_store_interval_secs() -> u64 {
    300
}

fn default_restore() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_retry_delays_ms() -> Vec<u64> {
    DEFAULT_SCHEDULE_MS.to_vec()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            file_storage_path: None,
            store_interval_secs: default_store_interval_secs(),
            restore: default_restore(),
            connect_timeout_secs: default_connect_timeout_secs(),
            retry_delays_ms: default_retry_delays_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            bind_addr: default_bind_addr(),
            secret_key: None,
            storage: StorageConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn options(&self) -> StorageOptions {
        StorageOptions {
            database_path: self.database_path.as_deref().map(PathBuf::from),
            file_storage_path: self.file_storage_path.as_deref().map(PathBuf::from),
            store_interval: Duration::from_secs(self.store_interval_secs),
            restore: self.restore,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            retry_schedule: schedule_from_millis(&self.retry_delays_ms),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.http_port)
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret_key.as_deref().filter(|s| !s.is_empty())
    }
}
