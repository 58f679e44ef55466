//! Remote call outcomes and client construction errors.

use filedetect_protocol::ApiErrorPayload;
use thiserror::Error;

/// Service code returned when no result is recorded for a fingerprint
/// (never uploaded, or the result expired).
pub const CODE_GET_RESULT_FAIL: &str = "GetResultFail";
pub const CODE_REQUEST_TOO_FREQUENTLY: &str = "RequestTooFrequently";
pub const CODE_THROTTLING_USER: &str = "Throttling.User";

/// Typed outcome of a failed remote call.
///
/// `NotFound` and `RateLimited` are expected protocol states the scan state
/// machine reacts to; `Api` and `Network` are fatal for the scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("no detection result recorded for this fingerprint")]
    NotFound,

    #[error("request rejected as too frequent")]
    RateLimited,

    /// The service answered with an error code.
    #[error("{code}: {message}")]
    Api { code: String, message: String },

    /// No response was received (connect/read failure, timeout, TLS).
    #[error("network error: {0}")]
    Network(String),
}

impl RemoteError {
    /// Classify a service error code.
    pub fn from_service_code(code: &str, message: &str) -> Self {
        match code {
            CODE_GET_RESULT_FAIL => RemoteError::NotFound,
            CODE_REQUEST_TOO_FREQUENTLY | CODE_THROTTLING_USER => RemoteError::RateLimited,
            _ => RemoteError::Api {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited)
    }

    /// Structured detail for a failure of `action`.
    pub fn to_payload(&self, action: &str) -> ApiErrorPayload {
        match self {
            RemoteError::NotFound => {
                ApiErrorPayload::new(action, CODE_GET_RESULT_FAIL, self.to_string())
            }
            RemoteError::RateLimited => {
                ApiErrorPayload::new(action, CODE_REQUEST_TOO_FREQUENTLY, self.to_string())
            }
            RemoteError::Api { code, message } => ApiErrorPayload::new(action, code, message),
            RemoteError::Network(message) => ApiErrorPayload::network(action, message),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Network(err.to_string())
    }
}

/// Errors building a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("access key id and secret are required")]
    MissingCredentials,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
