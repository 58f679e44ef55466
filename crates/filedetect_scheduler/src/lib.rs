//! Scan scheduling for filedetect.
//!
//! Turns "scan this file" into the sequence of remote calls a verdict
//! needs, with admission control, retry, backoff and time budgets:
//!
//! - **[`Detector`]**: lifecycle, admission, sequence numbers, drain
//! - **[`TaskQueue`]**: FIFO with deferred re-entry
//! - **`pool`**: tokio workers running one scan step at a time
//! - **[`ScanTask`]**: the per-file state machine

pub mod cancel;
pub mod config;
pub mod detector;
pub mod error;
pub mod fingerprint;
mod pool;
pub mod queue;
pub mod task;

pub use cancel::CancellationToken;
pub use config::DetectorConfig;
pub use detector::{Detector, Lifecycle};
pub use error::{DetectError, Result};
pub use queue::TaskQueue;
pub use task::{Phase, ResultCallback, ScanRequest, ScanTask, StepOutcome};

pub use filedetect_protocol::{DetectResult, ErrorKind, ScanTimeout, Sequence, Verdict};
