//! Failure discriminants carried by [`crate::DetectResult::Failure`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a submission did not produce a verdict.
///
/// Each kind keeps the negative integer code used at the SDK boundary so
/// callers that speak the integer form can map back and forth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Submission arrived while the detector was not running.
    #[error("detector is not initialized")]
    NotInitialized,
    /// `init` was called on a detector that is already running.
    #[error("detector is already initialized")]
    AlreadyInitialized,
    #[error("file not found or unreadable")]
    FileNotFound,
    #[error("detect queue is full")]
    QueueFull,
    /// A remote API call failed; see the attached [`ApiErrorPayload`].
    #[error("remote API call failed")]
    CallApiError,
    #[error("detection timed out")]
    Timeout,
    /// Uploading the file content failed. The caller may resubmit.
    #[error("file upload failed")]
    UploadFailed,
    /// The detector was shut down before the file was detected.
    #[error("detection aborted by shutdown")]
    Aborted,
    /// The deadline passed before the request made any remote call. Usually
    /// means submissions arrive faster than they can be serviced, or the
    /// timeout is too short.
    #[error("timed out before the request was serviced")]
    TimeoutBeforeQueued,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::NotInitialized,
        ErrorKind::AlreadyInitialized,
        ErrorKind::FileNotFound,
        ErrorKind::QueueFull,
        ErrorKind::CallApiError,
        ErrorKind::Timeout,
        ErrorKind::UploadFailed,
        ErrorKind::Aborted,
        ErrorKind::TimeoutBeforeQueued,
    ];

    /// Integer code at the SDK boundary. Always negative.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::NotInitialized | ErrorKind::AlreadyInitialized => -100,
            ErrorKind::FileNotFound => -99,
            ErrorKind::QueueFull => -98,
            ErrorKind::CallApiError => -97,
            ErrorKind::Timeout => -96,
            ErrorKind::UploadFailed => -95,
            ErrorKind::Aborted => -94,
            ErrorKind::TimeoutBeforeQueued => -93,
        }
    }

    /// Inverse of [`ErrorKind::code`]. -100 maps to `NotInitialized`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -100 => Some(ErrorKind::NotInitialized),
            -99 => Some(ErrorKind::FileNotFound),
            -98 => Some(ErrorKind::QueueFull),
            -97 => Some(ErrorKind::CallApiError),
            -96 => Some(ErrorKind::Timeout),
            -95 => Some(ErrorKind::UploadFailed),
            -94 => Some(ErrorKind::Aborted),
            -93 => Some(ErrorKind::TimeoutBeforeQueued),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotInitialized => "not_initialized",
            ErrorKind::AlreadyInitialized => "already_initialized",
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::CallApiError => "call_api_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UploadFailed => "upload_failed",
            ErrorKind::Aborted => "aborted",
            ErrorKind::TimeoutBeforeQueued => "timeout_before_queued",
        }
    }
}

/// Structured detail for a failed remote call.
///
/// `error_code` is the code returned by the service, or
/// [`ApiErrorPayload::NETWORK_ERROR`] when no response was received at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorPayload {
    pub action: String,
    pub error_code: String,
    pub error_message: String,
}

impl ApiErrorPayload {
    pub const NETWORK_ERROR: &'static str = "NetworkError";

    pub fn new(
        action: impl Into<String>,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            error_code: error_code.into(),
            error_message: error_message.into(),
        }
    }

    /// Detail for a call that never got a response.
    pub fn network(action: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self::new(action, Self::NETWORK_ERROR, error_message)
    }

    pub fn is_network_error(&self) -> bool {
        self.error_code == Self::NETWORK_ERROR
    }

    /// JSON form: `{"action":"..","error_code":"..","error_message":".."}`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for ApiErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed: {} ({})",
            self.action, self.error_code, self.error_message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_round_trip() {
        for kind in ErrorKind::ALL {
            let code = kind.code();
            assert!(code < 0, "{:?} must map to a negative code", kind);
            let back = ErrorKind::from_code(code).unwrap();
            if kind == ErrorKind::AlreadyInitialized {
                assert_eq!(back, ErrorKind::NotInitialized);
            } else {
                assert_eq!(back, kind);
            }
        }
        assert_eq!(ErrorKind::from_code(0), None);
        assert_eq!(ErrorKind::from_code(-92), None);
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = ApiErrorPayload::network("GetFileDetectResult", "connection refused");
        assert!(payload.is_network_error());

        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(value["action"], "GetFileDetectResult");
        assert_eq!(value["error_code"], "NetworkError");
        assert_eq!(value["error_message"], "connection refused");
    }
}
