//! Configuration for the detector

use crate::error::{DetectError, Result};
use filedetect_client::ClientConfig;
use filedetect_protocol::defaults::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUEUE_CAPACITY, DEFAULT_RATE_LIMIT_BACKOFF_MS,
    DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_WAIT_POLL_INTERVAL_MS, DEFAULT_WORKERS,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for a [`crate::Detector`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Number of worker tasks executing scan steps
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum number of admitted scans (queued plus executing)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Minimum gap between two result lookups of the same file
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Sleep after the service reports a rate limit
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_backoff_ms: u64,

    /// Poll period of `wait_until_below_capacity` / `wait_until_empty`
    #[serde(default = "default_wait_poll_interval")]
    pub wait_poll_interval_ms: u64,

    /// How long shutdown waits for workers to exit
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub client: ClientConfig,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_rate_limit_backoff() -> u64 {
    DEFAULT_RATE_LIMIT_BACKOFF_MS
}

fn default_wait_poll_interval() -> u64 {
    DEFAULT_WAIT_POLL_INTERVAL_MS
}

fn default_shutdown_grace() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval(),
            rate_limit_backoff_ms: default_rate_limit_backoff(),
            wait_poll_interval_ms: default_wait_poll_interval(),
            shutdown_grace_ms: default_shutdown_grace(),
            client: ClientConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DetectorConfig =
            toml::from_str(&content).map_err(|e| DetectError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| DetectError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the scheduler cannot run with. Credentials are
    /// checked separately when an HTTP client is built.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(DetectError::Config("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(DetectError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.wait_poll_interval_ms == 0 {
            return Err(DetectError::Config(
                "wait_poll_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DetectorConfig::default();
        assert_eq!(config.workers, 64);
        assert_eq!(config.queue_capacity, 200);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.rate_limit_backoff(), Duration::from_millis(100));
        assert_eq!(config.wait_poll_interval(), Duration::from_millis(200));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DetectorConfig = toml::from_str(
            r#"
            workers = 8

            [client]
            access_key_id = "id"
            access_key_secret = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_capacity, 200);
        assert_eq!(config.client.access_key_id, "id");
        assert_eq!(config.client.endpoint, "tds.aliyuncs.com");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = DetectorConfig {
            queue_capacity: 10,
            poll_interval_ms: 250,
            ..DetectorConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = DetectorConfig::load(&path).unwrap();
        assert_eq!(loaded.queue_capacity, 10);
        assert_eq!(loaded.poll_interval_ms, 250);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = DetectorConfig {
            queue_capacity: 0,
            ..DetectorConfig::default()
        };
        assert!(matches!(config.validate(), Err(DetectError::Config(_))));

        let config = DetectorConfig {
            workers: 0,
            ..DetectorConfig::default()
        };
        assert!(matches!(config.validate(), Err(DetectError::Config(_))));
    }
}
