//! Submission and result payload types.

use crate::error::{ApiErrorPayload, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Submission bookkeeping
// ============================================================================

/// Submission sequence number.
///
/// Handed out in submission order starting at 1. Values stay within the
/// positive half of an `i32` so they survive the integer SDK boundary; past
/// [`Sequence::MAX`] the counter wraps back to 1. Zero is reserved for
/// "never admitted".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(u32);

impl Sequence {
    pub const NONE: Sequence = Sequence(0);
    pub const FIRST: Sequence = Sequence(1);
    pub const MAX: Sequence = Sequence(i32::MAX as u32);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }

    /// The sequence handed out after this one. Never returns `NONE`.
    pub fn next(self) -> Self {
        if self.0 >= Self::MAX.0 {
            Self::FIRST
        } else {
            Self(self.0 + 1)
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-submission time budget, measured from submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScanTimeout {
    #[default]
    Infinite,
    After(Duration),
}

impl ScanTimeout {
    /// Integer form used by the SDK boundary: negative means infinite.
    pub fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            ScanTimeout::Infinite
        } else {
            ScanTimeout::After(Duration::from_millis(millis as u64))
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            ScanTimeout::Infinite => None,
            ScanTimeout::After(limit) => Some(*limit),
        }
    }

    /// True once `elapsed` is strictly past the budget.
    pub fn is_exceeded(&self, elapsed: Duration) -> bool {
        match self {
            ScanTimeout::Infinite => false,
            ScanTimeout::After(limit) => elapsed > *limit,
        }
    }

    /// Budget left after `elapsed`; `None` for an infinite budget.
    pub fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.as_duration().map(|limit| limit.saturating_sub(elapsed))
    }
}

impl fmt::Display for ScanTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTimeout::Infinite => write!(f, "infinite"),
            ScanTimeout::After(limit) => write!(f, "{}ms", limit.as_millis()),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Reputation verdict for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Benign.
    White,
    /// Malicious.
    Black,
    Unknown,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::White => "WHITE",
            Verdict::Black => "BLACK",
            Verdict::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A completed detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectSuccess {
    /// Hex MD5 of the file content.
    pub fingerprint: String,
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
    pub verdict: Verdict,
    /// 0-100. Only meaningful for `Black`.
    pub score: u8,
    pub virus_type: Option<String>,
    /// Service-defined JSON string with extra detail.
    pub ext_info: Option<String>,
}

impl DetectSuccess {
    /// Virus details, present only for a `Black` verdict.
    pub fn virus_info(&self) -> Option<(Option<&str>, Option<&str>)> {
        (self.verdict == Verdict::Black)
            .then(|| (self.virus_type.as_deref(), self.ext_info.as_deref()))
    }
}

/// A submission that ended without a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectFailure {
    /// Present once hashing finished.
    pub fingerprint: Option<String>,
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
    pub kind: ErrorKind,
    /// Remote call detail for `CallApiError` / `UploadFailed`.
    pub detail: Option<ApiErrorPayload>,
}

/// The single value every submission resolves to, exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetectResult {
    Success(DetectSuccess),
    Failure(DetectFailure),
}

impl DetectResult {
    /// Failure without remote detail.
    pub fn failure(kind: ErrorKind, fingerprint: Option<String>, elapsed: Duration) -> Self {
        DetectResult::Failure(DetectFailure {
            fingerprint,
            elapsed,
            kind,
            detail: None,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DetectResult::Success(_))
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            DetectResult::Success(success) => Some(success.verdict),
            DetectResult::Failure(_) => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            DetectResult::Success(_) => None,
            DetectResult::Failure(failure) => Some(failure.kind),
        }
    }

    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            DetectResult::Success(success) => Some(success.fingerprint.as_str()),
            DetectResult::Failure(failure) => failure.fingerprint.as_deref(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            DetectResult::Success(success) => success.elapsed,
            DetectResult::Failure(failure) => failure.elapsed,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
