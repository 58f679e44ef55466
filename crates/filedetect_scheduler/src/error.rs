//! Detector lifecycle and configuration errors.

use filedetect_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detector is already initialized")]
    AlreadyInitialized,

    #[error("init must be called from within a tokio runtime")]
    NoRuntime,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

pub type Result<T> = std::result::Result<T, DetectError>;
