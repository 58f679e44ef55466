//! Client for the remote file detection service.
//!
//! Provides:
//! - **[`DetectionService`]**: the four remote operations a scan needs
//!   (result lookup, upload-target issuance, object upload, trigger)
//! - **[`HttpDetectionClient`]**: signed RPC-over-HTTPS implementation
//! - **`stub`** (feature `stub`): scriptable in-memory service for tests

pub mod config;
pub mod error;
pub mod http;
pub mod service;
mod signing;
#[cfg(any(test, feature = "stub"))]
pub mod stub;

pub use config::ClientConfig;
pub use error::{ClientError, RemoteError};
pub use http::HttpDetectionClient;
pub use service::{
    DetectionService, LookupReply, LookupStatus, UploadContext, UploadTarget,
    ACTION_CREATE_DETECT, ACTION_CREATE_UPLOAD_URL, ACTION_GET_RESULT, ACTION_UPLOAD_FILE,
};
