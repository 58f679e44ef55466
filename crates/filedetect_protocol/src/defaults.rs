//! Canonical default values shared by the scheduler, client and CLI.

/// Number of concurrent scan workers.
pub const DEFAULT_WORKERS: usize = 64;
/// Maximum number of outstanding (queued + executing) scans.
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;
/// Minimum spacing between two result lookups of the same file.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
/// Sleep before repeating a call the remote side rejected as too frequent.
pub const DEFAULT_RATE_LIMIT_BACKOFF_MS: u64 = 100;
/// Polling granularity of the wait-for-capacity / wait-for-empty helpers.
pub const DEFAULT_WAIT_POLL_INTERVAL_MS: u64 = 200;
/// How long shutdown waits for workers to observe cancellation.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 6_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 6_000;
pub const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 60_000;

pub const DEFAULT_ENDPOINT: &str = "tds.aliyuncs.com";
pub const DEFAULT_API_VERSION: &str = "2018-12-03";

/// Per-file timeout used by the CLI when none is given.
pub const DEFAULT_DETECT_TIMEOUT_MS: i64 = 120_000;

/// Content type used for uploads when the extension is not recognised.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub const ACCESS_KEY_ID_ENV: &str = "FILEDETECT_ACCESS_KEY_ID";
pub const ACCESS_KEY_SECRET_ENV: &str = "FILEDETECT_ACCESS_KEY_SECRET";
