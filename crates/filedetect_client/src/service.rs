//! The remote detection service interface.

use crate::error::RemoteError;
use async_trait::async_trait;
use std::path::Path;

pub const ACTION_GET_RESULT: &str = "GetFileDetectResult";
pub const ACTION_CREATE_UPLOAD_URL: &str = "CreateFileDetectUploadUrl";
pub const ACTION_UPLOAD_FILE: &str = "UploadFile";
pub const ACTION_CREATE_DETECT: &str = "CreateFileDetect";

/// `Result` value of a lookup flagging the file as malicious.
pub const RESULT_MALICIOUS: i32 = 1;
/// `Result` value of a lookup whose detection is still running.
pub const RESULT_DETECTING: i32 = 3;

/// A recorded detection result for a fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupReply {
    /// Raw result code; see [`LookupReply::status`].
    pub result: i32,
    pub score: u8,
    pub virus_type: Option<String>,
    pub ext_info: Option<String>,
}

/// How the scan state machine reads a [`LookupReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStatus {
    Malicious,
    Detecting,
    /// Every other result code.
    Clean,
}

impl LookupReply {
    pub fn malicious(score: u8, virus_type: impl Into<String>) -> Self {
        Self {
            result: RESULT_MALICIOUS,
            score,
            virus_type: Some(virus_type.into()),
            ext_info: None,
        }
    }

    pub fn detecting() -> Self {
        Self {
            result: RESULT_DETECTING,
            ..Self::default()
        }
    }

    pub fn clean() -> Self {
        Self::default()
    }

    pub fn status(&self) -> LookupStatus {
        match self.result {
            RESULT_MALICIOUS => LookupStatus::Malicious,
            RESULT_DETECTING => LookupStatus::Detecting,
            _ => LookupStatus::Clean,
        }
    }
}

/// Signed form fields for a direct object-store upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadContext {
    pub access_id: String,
    pub policy: String,
    pub signature: String,
    /// Object key the trigger call refers to.
    pub object_key: String,
}

/// Where (and whether) to upload a file's content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadTarget {
    /// The service already holds this content; skip the upload.
    pub file_exists: bool,
    pub public_url: String,
    pub context: UploadContext,
}

/// Remote operations needed to scan one file.
///
/// Implementations map transport and protocol failures onto [`RemoteError`];
/// they never retry on their own.
#[async_trait]
pub trait DetectionService: Send + Sync {
    /// Fetch the recorded result for a fingerprint.
    /// `Err(RemoteError::NotFound)` when nothing is recorded.
    async fn lookup(&self, fingerprint: &str) -> Result<LookupReply, RemoteError>;

    /// Ask where to upload `size` bytes of content with this fingerprint.
    async fn request_upload_target(
        &self,
        fingerprint: &str,
        size: u64,
    ) -> Result<UploadTarget, RemoteError>;

    /// Upload the file at `path` to `target`.
    async fn upload(&self, path: &Path, target: &UploadTarget) -> Result<(), RemoteError>;

    /// Start detection of uploaded content.
    async fn trigger_detection(&self, fingerprint: &str, object_key: &str)
        -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_status_mapping() {
        assert_eq!(LookupReply::malicious(90, "Backdoor").status(), LookupStatus::Malicious);
        assert_eq!(LookupReply::detecting().status(), LookupStatus::Detecting);
        assert_eq!(LookupReply::clean().status(), LookupStatus::Clean);

        let other = LookupReply {
            result: 2,
            ..LookupReply::default()
        };
        assert_eq!(other.status(), LookupStatus::Clean);
    }
}
