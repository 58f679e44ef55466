//! Connection settings for the remote detection service.

use crate::error::ClientError;
use filedetect_protocol::defaults::{
    DEFAULT_API_VERSION, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_ENDPOINT, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_UPLOAD_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Host name, or a full base URL (`http://127.0.0.1:8080`) for testing.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub access_key_id: String,

    #[serde(default)]
    pub access_key_secret: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Total timeout of an API call after connecting.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Total timeout of a file upload.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_ms: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_upload_timeout() -> u64 {
    DEFAULT_UPLOAD_TIMEOUT_MS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_version: default_api_version(),
            access_key_id: String::new(),
            access_key_secret: String::new(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            upload_timeout_ms: default_upload_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn with_credentials(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.access_key_id.trim().is_empty() || self.access_key_secret.is_empty() {
            return Err(ClientError::MissingCredentials);
        }
        if self.endpoint.trim().is_empty() {
            return Err(ClientError::InvalidEndpoint("endpoint is empty".to_string()));
        }
        Ok(())
    }

    /// Base URL all RPC calls are posted to.
    pub fn base_url(&self) -> String {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if endpoint.contains("://") {
            format!("{}/", endpoint)
        } else {
            format!("https://{}/", endpoint)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("upload_timeout_ms", &self.upload_timeout_ms)
            .finish()
    }
}
