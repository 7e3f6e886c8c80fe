//! User settings read from `config.json` in the platform config directory.
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Chunks per download.
    pub threads: u8,
    /// Bandwidth cap in bytes per second shared by all workers.
    pub rate_limit: Option<u32>,
    pub retry_delay_ms: u64,
    /// Consecutive failures tolerated per chunk. `None` retries forever.
    pub max_retries: Option<u32>,
    pub progress_interval_ms: u64,
    pub default_dir: String,
    pub server_addr: String,
    pub port: u16,
    pub server_secret: Option<String>,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: 5,
            rate_limit: None,
            retry_delay_ms: 3000,
            max_retries: Some(5),
            progress_interval_ms: 1000,
            default_dir: ".".to_string(),
            server_addr: "127.0.0.1".to_string(),
            port: 9090,
            server_secret: None,
            user_agent: concat!("segfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Settings {
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("segfetch").join("config.json"))
    }

    /// Loads the user's settings. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            default_threads: self.threads.max(1),
            rate_limit: self.rate_limit,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_retries: self.max_retries,
            progress_interval: Duration::from_millis(self.progress_interval_ms.max(1)),
        }
    }
}

/// Knobs the coordinator itself needs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub default_threads: u8,
    pub rate_limit: Option<u32>,
    pub retry_delay: Duration,
    pub max_retries: Option<u32>,
    pub progress_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Settings::default().coordinator_config()
    }
}
