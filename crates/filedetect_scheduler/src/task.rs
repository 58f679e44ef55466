//! Per-file scan state machine.
//!
//! A [`ScanTask`] moves through its phases one [`ScanTask::step`] at a time:
//!
//! ```text
//! Hashing -> Lookup --not found--> UploadTrigger -> Polling --detecting--> Polling
//!              |                                      |
//!              +---------- verdict / failure ---------+--> terminal delivery
//! ```
//!
//! Each step performs at most one phase and tells the worker pool what to do
//! next through [`StepOutcome`]. The task is owned by exactly one place at a
//! time (queue or worker), and terminal delivery consumes it, so the result
//! callback fires at most once. Dropping an undelivered task delivers
//! `Aborted`, so it also fires at least once.

use crate::fingerprint;
use filedetect_client::{
    DetectionService, LookupReply, LookupStatus, RemoteError, ACTION_CREATE_DETECT,
    ACTION_CREATE_UPLOAD_URL, ACTION_GET_RESULT, ACTION_UPLOAD_FILE,
};
use filedetect_protocol::{
    DetectFailure, DetectResult, DetectSuccess, ErrorKind, ScanTimeout, Sequence, Verdict,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Caller-supplied result sink. Invoked exactly once per admitted submission.
pub type ResultCallback = Box<dyn FnOnce(Sequence, &Path, DetectResult) + Send + 'static>;

/// Runs right after the callback on terminal delivery (in-flight bookkeeping).
pub(crate) type Release = Box<dyn FnOnce() + Send + 'static>;

/// An admitted "scan this file" request.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub path: PathBuf,
    pub size: u64,
    pub timeout: ScanTimeout,
    pub sequence: Sequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Hashing,
    Lookup,
    UploadTrigger,
    Polling,
}

/// What the worker does with a task after one step.
#[derive(Debug)]
pub enum StepOutcome {
    /// Deliver this result; the task is finished.
    Terminal(DetectResult),
    /// Requeue at the tail, ready immediately.
    Continue,
    /// Requeue at the tail, not to be picked up before `after` has passed.
    Retry { after: Duration },
}

/// Shared, read-only inputs of every step.
pub(crate) struct StepContext {
    pub service: Arc<dyn DetectionService>,
    pub poll_interval: Duration,
    pub rate_limit_backoff: Duration,
}

enum CallError {
    Remote(RemoteError),
    /// The remaining time budget ran out while waiting for the service.
    OutOfTime,
}

/// A request's time budget, measured from admission.
#[derive(Debug, Clone, Copy)]
struct Budget {
    timeout: ScanTimeout,
    started_at: Instant,
}

impl Budget {
    fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn is_exceeded(&self) -> bool {
        self.timeout.is_exceeded(self.elapsed())
    }

    /// Await a remote call, bounded by what is left of the budget.
    async fn bound<T, F>(self, fut: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match self.timeout.remaining(self.elapsed()) {
            None => fut.await.map_err(CallError::Remote),
            Some(remaining) => match tokio::time::timeout(remaining, fut).await {
                Ok(reply) => reply.map_err(CallError::Remote),
                Err(_) => Err(CallError::OutOfTime),
            },
        }
    }
}

struct Completion {
    release: Release,
    callback: ResultCallback,
}

pub struct ScanTask {
    request: ScanRequest,
    fingerprint: Option<String>,
    phase: Phase,
    budget: Budget,
    last_poll_at: Option<Instant>,
    rate_limit_retries: u32,
    completion: Option<Completion>,
}

impl ScanTask {
    pub(crate) fn new(request: ScanRequest, release: Release, callback: ResultCallback) -> Self {
        let budget = Budget {
            timeout: request.timeout,
            started_at: Instant::now(),
        };
        Self {
            request,
            fingerprint: None,
            phase: Phase::Hashing,
            budget,
            last_poll_at: None,
            rate_limit_retries: 0,
            completion: Some(Completion { release, callback }),
        }
    }

    pub fn sequence(&self) -> Sequence {
        self.request.sequence
    }

    pub fn path(&self) -> &Path {
        &self.request.path
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn rate_limit_retries(&self) -> u32 {
        self.rate_limit_retries
    }

    // ========================================================================
    // Terminal delivery
    // ========================================================================

    /// Deliver `result`: invoke the callback, then release the in-flight slot.
    /// A drained detector therefore has no callback still running.
    pub fn finish(mut self, result: DetectResult) {
        self.deliver(result);
    }

    /// Deliver `Aborted`.
    pub fn abort(self) {
        let result = self.failure(ErrorKind::Aborted);
        self.finish(result);
    }

    fn deliver(&mut self, result: DetectResult) {
        let Some(completion) = self.completion.take() else {
            return;
        };
        match &result {
            DetectResult::Success(success) => info!(
                "Scan #{} finished: {} ({}, {} rate-limit retries)",
                self.request.sequence,
                success.verdict,
                self.request.path.display(),
                self.rate_limit_retries
            ),
            DetectResult::Failure(failure) => info!(
                "Scan #{} failed: {} ({})",
                self.request.sequence,
                failure.kind.as_str(),
                self.request.path.display()
            ),
        }
        (completion.callback)(self.request.sequence, &self.request.path, result);
        (completion.release)();
    }

    // ========================================================================
    // Result construction
    // ========================================================================

    fn elapsed(&self) -> Duration {
        self.budget.elapsed()
    }

    fn failure(&self, kind: ErrorKind) -> DetectResult {
        DetectResult::failure(kind, self.fingerprint.clone(), self.elapsed())
    }

    fn remote_failure(&self, kind: ErrorKind, action: &str, err: &RemoteError) -> DetectResult {
        warn!(
            "Scan #{}: {} failed: {}",
            self.request.sequence, action, err
        );
        DetectResult::Failure(DetectFailure {
            fingerprint: self.fingerprint.clone(),
            elapsed: self.elapsed(),
            kind,
            detail: Some(err.to_payload(action)),
        })
    }

    fn success(&self, fingerprint: String, verdict: Verdict, reply: LookupReply) -> DetectResult {
        DetectResult::Success(DetectSuccess {
            fingerprint,
            elapsed: self.elapsed(),
            verdict,
            score: reply.score,
            virus_type: reply.virus_type,
            ext_info: reply.ext_info,
        })
    }

    /// Terminal result when the time budget is spent. Before a fingerprint
    /// exists this means the request never got serviced.
    fn expired(&self) -> Option<DetectResult> {
        if !self.budget.is_exceeded() {
            return None;
        }
        let kind = if self.fingerprint.is_some() {
            ErrorKind::Timeout
        } else {
            ErrorKind::TimeoutBeforeQueued
        };
        Some(self.failure(kind))
    }

    fn out_of_time(&self) -> DetectResult {
        self.expired()
            .unwrap_or_else(|| self.failure(ErrorKind::Timeout))
    }

    // ========================================================================
    // Steps
    // ========================================================================

    /// Run the current phase.
    pub(crate) async fn step(&mut self, ctx: &StepContext) -> StepOutcome {
        if let Some(result) = self.expired() {
            return StepOutcome::Terminal(result);
        }
        match self.phase {
            Phase::Hashing => self.hash().await,
            Phase::Lookup | Phase::Polling => self.poll(ctx).await,
            Phase::UploadTrigger => self.upload_and_trigger(ctx).await,
        }
    }

    async fn hash(&mut self) -> StepOutcome {
        match fingerprint::md5_file_async(self.request.path.clone()).await {
            Ok(digest) => {
                debug!(
                    "Scan #{}: {} has md5 {}",
                    self.request.sequence,
                    self.request.path.display(),
                    digest
                );
                self.fingerprint = Some(digest);
                self.phase = Phase::Lookup;
                StepOutcome::Continue
            }
            Err(e) => {
                warn!(
                    "Scan #{}: cannot read {}: {}",
                    self.request.sequence,
                    self.request.path.display(),
                    e
                );
                StepOutcome::Terminal(self.failure(ErrorKind::FileNotFound))
            }
        }
    }

    async fn poll(&mut self, ctx: &StepContext) -> StepOutcome {
        if let Some(last) = self.last_poll_at {
            let since = last.elapsed();
            if since < ctx.poll_interval {
                return StepOutcome::Retry {
                    after: ctx.poll_interval - since,
                };
            }
        }
        let Some(fingerprint) = self.fingerprint.clone() else {
            self.phase = Phase::Hashing;
            return StepOutcome::Continue;
        };

        loop {
            if let Some(result) = self.expired() {
                return StepOutcome::Terminal(result);
            }
            self.last_poll_at = Some(Instant::now());

            let budget = self.budget;
            match budget.bound(ctx.service.lookup(&fingerprint)).await {
                Ok(reply) => {
                    return match reply.status() {
                        LookupStatus::Malicious => StepOutcome::Terminal(self.success(
                            fingerprint,
                            Verdict::Black,
                            reply,
                        )),
                        LookupStatus::Detecting => {
                            self.phase = Phase::Polling;
                            StepOutcome::Continue
                        }
                        LookupStatus::Clean => StepOutcome::Terminal(self.success(
                            fingerprint,
                            Verdict::White,
                            reply,
                        )),
                    };
                }
                Err(CallError::Remote(RemoteError::RateLimited)) => self.back_off(ctx).await,
                Err(CallError::Remote(RemoteError::NotFound)) => {
                    self.phase = Phase::UploadTrigger;
                    return StepOutcome::Continue;
                }
                Err(CallError::Remote(err)) => {
                    return StepOutcome::Terminal(self.remote_failure(
                        ErrorKind::CallApiError,
                        ACTION_GET_RESULT,
                        &err,
                    ))
                }
                Err(CallError::OutOfTime) => return StepOutcome::Terminal(self.out_of_time()),
            }
        }
    }

    async fn upload_and_trigger(&mut self, ctx: &StepContext) -> StepOutcome {
        let Some(fingerprint) = self.fingerprint.clone() else {
            self.phase = Phase::Hashing;
            return StepOutcome::Continue;
        };

        loop {
            if let Some(result) = self.expired() {
                return StepOutcome::Terminal(result);
            }
            match Self::upload_sequence(ctx, self.budget, &self.request, &fingerprint).await {
                Ok(()) => {
                    self.phase = Phase::Polling;
                    return StepOutcome::Continue;
                }
                Err((_, _, CallError::Remote(RemoteError::RateLimited))) => {
                    self.back_off(ctx).await
                }
                Err((_, _, CallError::OutOfTime)) => {
                    return StepOutcome::Terminal(self.out_of_time())
                }
                Err((kind, action, CallError::Remote(err))) => {
                    return StepOutcome::Terminal(self.remote_failure(kind, action, &err))
                }
            }
        }
    }

    /// Upload-target request, upload (unless the content already exists),
    /// trigger. A failure reports the error kind and action it maps to.
    async fn upload_sequence(
        ctx: &StepContext,
        budget: Budget,
        request: &ScanRequest,
        fingerprint: &str,
    ) -> Result<(), (ErrorKind, &'static str, CallError)> {
        let target = budget
            .bound(ctx.service.request_upload_target(fingerprint, request.size))
            .await
            .map_err(|e| (ErrorKind::CallApiError, ACTION_CREATE_UPLOAD_URL, e))?;

        if target.file_exists {
            debug!(
                "Scan #{}: content already held by the service, skipping upload",
                request.sequence
            );
        } else {
            budget
                .bound(ctx.service.upload(&request.path, &target))
                .await
                .map_err(|e| (ErrorKind::UploadFailed, ACTION_UPLOAD_FILE, e))?;
        }

        budget
            .bound(
                ctx.service
                    .trigger_detection(fingerprint, &target.context.object_key),
            )
            .await
            .map_err(|e| (ErrorKind::CallApiError, ACTION_CREATE_DETECT, e))
    }

    async fn back_off(&mut self, ctx: &StepContext) {
        self.rate_limit_retries += 1;
        debug!(
            "Scan #{}: rate limited, retry {} in {:?}",
            self.request.sequence, self.rate_limit_retries, ctx.rate_limit_backoff
        );
        tokio::time::sleep(ctx.rate_limit_backoff).await;
    }
}

impl Drop for ScanTask {
    fn drop(&mut self) {
        if self.completion.is_some() {
            let result = self.failure(ErrorKind::Aborted);
            self.deliver(result);
        }
    }
}

impl std::fmt::Debug for ScanTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanTask")
            .field("request", &self.request)
            .field("fingerprint", &self.fingerprint)
            .field("phase", &self.phase)
            .field("rate_limit_retries", &self.rate_limit_retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filedetect_client::stub::StubService;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    type Delivered = Arc<Mutex<Vec<(Sequence, DetectResult)>>>;

    fn fixture(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    fn context(stub: &Arc<StubService>) -> StepContext {
        StepContext {
            service: stub.clone(),
            poll_interval: Duration::from_millis(100),
            rate_limit_backoff: Duration::from_millis(100),
        }
    }

    fn task(path: &Path, timeout: ScanTimeout) -> (ScanTask, Delivered, Arc<Mutex<u32>>) {
        let delivered: Delivered = Arc::default();
        let released = Arc::new(Mutex::new(0u32));
        let request = ScanRequest {
            path: path.to_path_buf(),
            size: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            timeout,
            sequence: Sequence::new(7),
        };
        let sink = delivered.clone();
        let counter = released.clone();
        let task = ScanTask::new(
            request,
            Box::new(move || *counter.lock().unwrap() += 1),
            Box::new(move |seq, _path: &Path, result| sink.lock().unwrap().push((seq, result))),
        );
        (task, delivered, released)
    }

    async fn run_to_end(mut task: ScanTask, ctx: &StepContext) -> u32 {
        loop {
            match task.step(ctx).await {
                StepOutcome::Terminal(result) => {
                    let retries = task.rate_limit_retries();
                    task.finish(result);
                    return retries;
                }
                StepOutcome::Continue => {}
                StepOutcome::Retry { after } => tokio::time::sleep(after).await,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_black_file() {
        let file = fixture(b"malware");
        let stub = Arc::new(StubService::new());
        stub.push_lookup(Ok(LookupReply::malicious(95, "Backdoor")));
        let (task, delivered, released) = task(file.path(), ScanTimeout::Infinite);

        run_to_end(task, &context(&stub)).await;

        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let (seq, result) = &delivered[0];
        assert_eq!(*seq, Sequence::new(7));
        assert_eq!(result.verdict(), Some(Verdict::Black));
        assert_eq!(*released.lock().unwrap(), 1);
        assert_eq!(stub.calls().upload_target, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_then_poll_until_clean() {
        let file = fixture(b"0123456789");
        let stub = Arc::new(StubService::new());
        stub.push_lookup(Err(RemoteError::NotFound))
            .push_lookup(Ok(LookupReply::detecting()))
            .push_lookup(Ok(LookupReply::clean()));
        let (task, delivered, _) = task(file.path(), ScanTimeout::Infinite);

        run_to_end(task, &context(&stub)).await;

        let calls = stub.calls();
        assert_eq!(calls.lookup, 3);
        assert_eq!(calls.upload, 1);
        assert_eq!(calls.trigger, 1);
        let result = &delivered.lock().unwrap()[0].1;
        assert_eq!(result.verdict(), Some(Verdict::White));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_content_skips_upload() {
        let file = fixture(b"known content");
        let stub = Arc::new(StubService::new());
        stub.push_lookup(Err(RemoteError::NotFound))
            .push_upload_target(Ok(filedetect_client::UploadTarget {
                file_exists: true,
                ..Default::default()
            }))
            .push_lookup(Ok(LookupReply::clean()));
        let (task, _, _) = task(file.path(), ScanTimeout::Infinite);

        run_to_end(task, &context(&stub)).await;

        let calls = stub.calls();
        assert_eq!(calls.upload, 0);
        assert_eq!(calls.trigger, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_premature_poll_is_deferred() {
        let file = fixture(b"slow");
        let stub = Arc::new(StubService::new());
        stub.push_lookup(Ok(LookupReply::detecting()));
        let ctx = context(&stub);
        let (mut task, _, _) = task(file.path(), ScanTimeout::Infinite);

        assert!(matches!(task.step(&ctx).await, StepOutcome::Continue));
        assert!(matches!(task.step(&ctx).await, StepOutcome::Continue));
        assert_eq!(task.phase(), Phase::Polling);

        tokio::time::sleep(Duration::from_millis(30)).await;
        match task.step(&ctx).await {
            StepOutcome::Retry { after } => assert_eq!(after, Duration::from_millis(70)),
            other => panic!("expected Retry, got {:?}", other),
        }
        assert_eq!(stub.calls().lookup, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_are_counted() {
        let file = fixture(b"busy");
        let stub = Arc::new(StubService::new());
        stub.push_lookup(Err(RemoteError::RateLimited))
            .push_lookup(Err(RemoteError::RateLimited))
            .push_lookup(Ok(LookupReply::malicious(70, "Worm")));
        let (task, delivered, _) = task(file.path(), ScanTimeout::Infinite);

        let retries = run_to_end(task, &context(&stub)).await;

        assert_eq!(retries, 2);
        assert_eq!(stub.calls().lookup, 3);
        let result = &delivered.lock().unwrap()[0].1;
        assert_eq!(result.verdict(), Some(Verdict::Black));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_carries_action() {
        let file = fixture(b"payload");
        let stub = Arc::new(StubService::new());
        stub.push_lookup(Err(RemoteError::NotFound))
            .push_upload(Err(RemoteError::Network("reset by peer".into())));
        let (task, delivered, _) = task(file.path(), ScanTimeout::Infinite);

        run_to_end(task, &context(&stub)).await;

        let delivered = delivered.lock().unwrap();
        let DetectResult::Failure(failure) = &delivered[0].1 else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, ErrorKind::UploadFailed);
        let detail = failure.detail.as_ref().unwrap();
        assert_eq!(detail.action, "UploadFile");
        assert!(detail.is_network_error());
        assert!(failure.fingerprint.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_api_error_is_call_api_error() {
        let file = fixture(b"x");
        let stub = Arc::new(StubService::new());
        stub.push_lookup(Err(RemoteError::api("InvalidParameter", "bad hash")));
        let (task, delivered, _) = task(file.path(), ScanTimeout::Infinite);

        run_to_end(task, &context(&stub)).await;

        let delivered = delivered.lock().unwrap();
        let DetectResult::Failure(failure) = &delivered[0].1 else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, ErrorKind::CallApiError);
        let detail = failure.detail.as_ref().unwrap();
        assert_eq!(detail.action, "GetFileDetectResult");
        assert_eq!(detail.error_code, "InvalidParameter");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_file_at_hash_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.bin");
        let stub = Arc::new(StubService::new());
        let (task, delivered, _) = task(&path, ScanTimeout::Infinite);

        run_to_end(task, &context(&stub)).await;

        let result = &delivered.lock().unwrap()[0].1;
        assert_eq!(result.error_kind(), Some(ErrorKind::FileNotFound));
        assert_eq!(stub.calls().lookup, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_before_hashing() {
        let file = fixture(b"late");
        let stub = Arc::new(StubService::new());
        let (task, delivered, _) =
            task(file.path(), ScanTimeout::After(Duration::from_millis(50)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        run_to_end(task, &context(&stub)).await;

        let result = &delivered.lock().unwrap()[0].1;
        assert_eq!(result.error_kind(), Some(ErrorKind::TimeoutBeforeQueued));
        assert_eq!(result.fingerprint(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_lookup_times_out() {
        let file = fixture(b"hang");
        let stub = Arc::new(StubService::new());
        stub.push_lookup_hang();
        let (task, delivered, _) =
            task(file.path(), ScanTimeout::After(Duration::from_millis(500)));

        run_to_end(task, &context(&stub)).await;

        let result = &delivered.lock().unwrap()[0].1;
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert!(result.fingerprint().is_some());
    }

    #[tokio::test]
    async fn test_dropped_task_delivers_aborted_once() {
        let file = fixture(b"dropped");
        let (task, delivered, released) = task(file.path(), ScanTimeout::Infinite);

        drop(task);

        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.error_kind(), Some(ErrorKind::Aborted));
        assert_eq!(*released.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_callback_completes_before_slot_release() {
        let file = fixture(b"ordered");
        let order = Arc::new(Mutex::new(Vec::new()));
        let request = ScanRequest {
            path: file.path().to_path_buf(),
            size: 7,
            timeout: ScanTimeout::Infinite,
            sequence: Sequence::new(1),
        };
        let on_release = order.clone();
        let on_result = order.clone();
        let task = ScanTask::new(
            request,
            Box::new(move || on_release.lock().unwrap().push("release")),
            Box::new(move |_, _path: &Path, _| on_result.lock().unwrap().push("callback")),
        );

        task.abort();

        assert_eq!(*order.lock().unwrap(), vec!["callback", "release"]);
    }
}
