//! Shared types for the filedetect workspace.
//!
//! Everything that crosses a crate boundary lives here:
//!
//! - [`DetectResult`]: the single value every submission resolves to
//! - [`ErrorKind`] / [`ApiErrorPayload`]: failure discriminant and the structured
//!   remote error detail attached to `CallApiError` / `UploadFailed`
//! - [`Sequence`] / [`ScanTimeout`]: submission bookkeeping
//! - [`defaults`]: canonical tuning constants used by config defaults

pub mod defaults;
pub mod error;
mod format;
pub mod paths;
pub mod types;

pub use error::{ApiErrorPayload, ErrorKind};
pub use types::{DetectFailure, DetectResult, DetectSuccess, ScanTimeout, Sequence, Verdict};
