//! The detector facade: lifecycle, admission control, sequence numbers and
//! drain.
//!
//! A [`Detector`] owns one [`TaskQueue`] and one [`WorkerPool`] while it is
//! running. All lifecycle, sequence and in-flight bookkeeping lives behind a
//! single mutex that is only held for short, non-async critical sections.
//! Admission (lifecycle check, sequence allocation, depth check and enqueue)
//! happens under that lock as one step.
//!
//! Lock order is detector state, then queue. Tasks are never dropped or
//! delivered while the detector state is locked, because delivery releases
//! the task's in-flight slot through the same lock.

use crate::cancel::CancellationToken;
use crate::config::DetectorConfig;
use crate::error::{DetectError, Result};
use crate::fingerprint;
use crate::pool::WorkerPool;
use crate::queue::TaskQueue;
use crate::task::{Release, ResultCallback, ScanRequest, ScanTask, StepContext};
use filedetect_client::{DetectionService, HttpDetectionClient};
use filedetect_protocol::{DetectResult, ErrorKind, ScanTimeout, Sequence};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Running,
    ShuttingDown,
}

struct Running {
    queue: Arc<TaskQueue>,
    cancel: CancellationToken,
    pool: WorkerPool,
}

struct Shared {
    lifecycle: Lifecycle,
    next_sequence: Sequence,
    in_flight: usize,
    /// Bumped on every init so tasks of an earlier run cannot release slots
    /// of a later one.
    epoch: u64,
    running: Option<Running>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Detector {
    config: DetectorConfig,
    service: Arc<dyn DetectionService>,
    shared: Arc<Mutex<Shared>>,
}

impl Detector {
    pub fn new(config: DetectorConfig, service: Arc<dyn DetectionService>) -> Self {
        Self {
            config,
            service,
            shared: Arc::new(Mutex::new(Shared {
                lifecycle: Lifecycle::Uninitialized,
                next_sequence: Sequence::FIRST,
                in_flight: 0,
                epoch: 0,
                running: None,
            })),
        }
    }

    /// Build a detector talking to the HTTP service described by
    /// `config.client`.
    pub fn connect(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        let client = HttpDetectionClient::new(config.client.clone())?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        lock(&self.shared).lifecycle
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the worker pool. Must be called from within a tokio runtime.
    /// Fails without side effects when the detector is already running.
    pub fn init(&self) -> Result<()> {
        self.config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(DetectError::NoRuntime);
        }

        let mut shared = lock(&self.shared);
        if shared.lifecycle != Lifecycle::Uninitialized {
            return Err(DetectError::AlreadyInitialized);
        }

        let queue = Arc::new(TaskQueue::new());
        let cancel = CancellationToken::new();
        let ctx = Arc::new(StepContext {
            service: self.service.clone(),
            poll_interval: self.config.poll_interval(),
            rate_limit_backoff: self.config.rate_limit_backoff(),
        });
        let pool = WorkerPool::spawn(self.config.workers, queue.clone(), ctx, cancel.clone());

        shared.epoch += 1;
        shared.in_flight = 0;
        shared.running = Some(Running {
            queue,
            cancel,
            pool,
        });
        shared.lifecycle = Lifecycle::Running;

        info!(
            "Detector started: {} workers, queue capacity {}",
            self.config.workers, self.config.queue_capacity
        );
        Ok(())
    }

    /// Stop the detector. Every queued and executing scan is delivered
    /// `Aborted`; workers get `shutdown_grace` to exit. Afterwards the
    /// detector is uninitialized and may be started again.
    pub async fn shutdown(&self) {
        let running = {
            let mut shared = lock(&self.shared);
            if shared.lifecycle != Lifecycle::Running {
                return;
            }
            shared.lifecycle = Lifecycle::ShuttingDown;
            shared.running.take()
        };

        if let Some(running) = running {
            info!("Detector shutting down");
            running.cancel.cancel();

            let drained = running.queue.close_and_drain();
            if !drained.is_empty() {
                debug!("Aborting {} queued scans", drained.len());
            }
            for task in drained {
                task.abort();
            }

            let workers = running.pool.len();
            if running.pool.join(self.config.shutdown_grace()).await {
                debug!("All {} scan workers stopped", workers);
            }
        }

        lock(&self.shared).lifecycle = Lifecycle::Uninitialized;
        info!("Detector stopped");
    }

    /// Non-blocking part of [`Detector::shutdown`]: cancel workers and abort
    /// queued scans without waiting for workers to exit.
    fn shutdown_now(&self) {
        let running = {
            let mut shared = lock(&self.shared);
            shared.lifecycle = Lifecycle::Uninitialized;
            shared.running.take()
        };
        if let Some(running) = running {
            running.cancel.cancel();
            for task in running.queue.close_and_drain() {
                task.abort();
            }
        }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit `path` for scanning. `callback` is invoked exactly once with the
    /// result, on a worker task for admitted scans, or synchronously before
    /// this returns when the submission is rejected.
    ///
    /// Rejections: `FileNotFound` (missing or not a regular file),
    /// `NotInitialized`, `Aborted` (shutting down), `QueueFull` (the sequence
    /// number is still consumed and passed to the callback).
    pub fn submit<F>(
        &self,
        path: impl AsRef<Path>,
        timeout: ScanTimeout,
        callback: F,
    ) -> std::result::Result<Sequence, ErrorKind>
    where
        F: FnOnce(Sequence, &Path, DetectResult) + Send + 'static,
    {
        self.submit_boxed(path.as_ref(), timeout, Box::new(callback))
    }

    fn submit_boxed(
        &self,
        path: &Path,
        timeout: ScanTimeout,
        callback: ResultCallback,
    ) -> std::result::Result<Sequence, ErrorKind> {
        let size = match fingerprint::file_size(path) {
            Ok(size) => size,
            Err(e) => {
                debug!("Rejecting {}: {}", path.display(), e);
                return reject(callback, Sequence::NONE, path, ErrorKind::FileNotFound);
            }
        };

        let mut shared = lock(&self.shared);
        match shared.lifecycle {
            Lifecycle::Uninitialized => {
                drop(shared);
                return reject(callback, Sequence::NONE, path, ErrorKind::NotInitialized);
            }
            Lifecycle::ShuttingDown => {
                drop(shared);
                return reject(callback, Sequence::NONE, path, ErrorKind::Aborted);
            }
            Lifecycle::Running => {}
        }

        let sequence = shared.next_sequence;
        shared.next_sequence = sequence.next();

        if shared.in_flight >= self.config.queue_capacity {
            let depth = shared.in_flight;
            drop(shared);
            debug!(
                "Rejecting scan #{} of {}: queue full ({} in flight)",
                sequence,
                path.display(),
                depth
            );
            return reject(callback, sequence, path, ErrorKind::QueueFull);
        }

        let Some(queue) = shared.running.as_ref().map(|r| r.queue.clone()) else {
            drop(shared);
            return reject(callback, Sequence::NONE, path, ErrorKind::NotInitialized);
        };

        shared.in_flight += 1;
        let release = self.release_for(shared.epoch);
        let task = ScanTask::new(
            ScanRequest {
                path: path.to_path_buf(),
                size,
                timeout,
                sequence,
            },
            release,
            callback,
        );
        let pushed = queue.push(task);
        drop(shared);

        match pushed {
            Ok(()) => {
                debug!(
                    "Admitted scan #{}: {} ({} bytes, timeout {})",
                    sequence,
                    path.display(),
                    size,
                    timeout
                );
                Ok(sequence)
            }
            Err(task) => {
                task.abort();
                Err(ErrorKind::Aborted)
            }
        }
    }

    fn release_for(&self, epoch: u64) -> Release {
        let shared: Weak<Mutex<Shared>> = Arc::downgrade(&self.shared);
        Box::new(move || {
            if let Some(shared) = shared.upgrade() {
                let mut shared = lock(&shared);
                if shared.epoch == epoch {
                    shared.in_flight = shared.in_flight.saturating_sub(1);
                }
            }
        })
    }

    /// Submit and get the result through a one-shot channel. A rejected
    /// submission returns its failure result directly.
    pub fn submit_with_receiver(
        &self,
        path: impl AsRef<Path>,
        timeout: ScanTimeout,
    ) -> std::result::Result<(Sequence, oneshot::Receiver<DetectResult>), DetectResult> {
        let (tx, mut rx) = oneshot::channel();
        let submitted = self.submit(path, timeout, move |_, _: &Path, result| {
            let _ = tx.send(result);
        });
        match submitted {
            Ok(sequence) => Ok((sequence, rx)),
            Err(kind) => Err(rx
                .try_recv()
                .unwrap_or_else(|_| DetectResult::failure(kind, None, Duration::ZERO))),
        }
    }

    /// Scan one file and wait for its result.
    pub async fn scan(&self, path: impl AsRef<Path>, timeout: ScanTimeout) -> DetectResult {
        match self.submit_with_receiver(path, timeout) {
            Ok((_, rx)) => rx.await.unwrap_or_else(|_| aborted()),
            Err(result) => result,
        }
    }

    /// [`Detector::scan`] for synchronous callers. Blocks the current thread,
    /// so it must not be called from an async context.
    pub fn scan_blocking(&self, path: impl AsRef<Path>, timeout: ScanTimeout) -> DetectResult {
        match self.submit_with_receiver(path, timeout) {
            Ok((_, rx)) => rx.blocking_recv().unwrap_or_else(|_| aborted()),
            Err(result) => result,
        }
    }

    // ========================================================================
    // Depth and drain
    // ========================================================================

    /// Admitted scans not yet delivered. 0 when the detector is not running.
    pub fn queue_depth(&self) -> usize {
        let shared = lock(&self.shared);
        if shared.lifecycle == Lifecycle::Running {
            shared.in_flight
        } else {
            0
        }
    }

    /// Wait until a new submission would be admitted. Returns false when
    /// `timeout` passes first.
    pub async fn wait_until_below_capacity(&self, timeout: ScanTimeout) -> bool {
        let capacity = self.config.queue_capacity;
        self.wait_until(timeout, |depth| depth < capacity).await
    }

    /// Wait until every admitted scan has been delivered. Returns false when
    /// `timeout` passes first.
    pub async fn wait_until_empty(&self, timeout: ScanTimeout) -> bool {
        self.wait_until(timeout, |depth| depth == 0).await
    }

    async fn wait_until(&self, timeout: ScanTimeout, done: impl Fn(usize) -> bool) -> bool {
        let started = Instant::now();
        let interval = self.config.wait_poll_interval();
        loop {
            if done(self.queue_depth()) {
                return true;
            }
            let pause = match timeout.remaining(started.elapsed()) {
                None => interval,
                Some(remaining) if remaining.is_zero() => return false,
                Some(remaining) => remaining.min(interval),
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Stop workers from taking queued scans. Submissions are still admitted
    /// up to capacity.
    pub fn pause(&self) {
        if let Some(queue) = self.queue() {
            queue.pause();
            debug!("Detector paused");
        }
    }

    pub fn resume(&self) {
        if let Some(queue) = self.queue() {
            queue.resume();
            debug!("Detector resumed");
        }
    }

    fn queue(&self) -> Option<Arc<TaskQueue>> {
        lock(&self.shared).running.as_ref().map(|r| r.queue.clone())
    }

    #[cfg(test)]
    pub(crate) fn set_next_sequence(&self, sequence: Sequence) {
        lock(&self.shared).next_sequence = sequence;
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        if lock(&self.shared).lifecycle != Lifecycle::Uninitialized {
            warn!("Detector dropped while running; aborting outstanding scans");
            self.shutdown_now();
        }
    }
}

fn reject(
    callback: ResultCallback,
    sequence: Sequence,
    path: &Path,
    kind: ErrorKind,
) -> std::result::Result<Sequence, ErrorKind> {
    callback(sequence, path, DetectResult::failure(kind, None, Duration::ZERO));
    Err(kind)
}

fn aborted() -> DetectResult {
    DetectResult::failure(ErrorKind::Aborted, None, Duration::ZERO)
}
