//! Fixed-size pool of tokio worker tasks draining a [`TaskQueue`].
//!
//! Each worker loops: take the next ready task, run one step, then deliver
//! the terminal result or put the task back at the tail of the queue. A
//! cancelled step delivers `Aborted`.

use crate::cancel::CancellationToken;
use crate::queue::TaskQueue;
use crate::task::{ScanTask, StepContext, StepOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current runtime.
    pub(crate) fn spawn(
        workers: usize,
        queue: Arc<TaskQueue>,
        ctx: Arc<StepContext>,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    queue.clone(),
                    ctx.clone(),
                    cancel.clone(),
                ))
            })
            .collect();
        debug!("Spawned {} scan workers", workers);
        Self { handles }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit, at most `grace` in total. Workers still
    /// running after that are aborted. Returns whether all exited in time.
    pub(crate) async fn join(self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        let mut clean = true;
        for handle in self.handles {
            if clean {
                let abort = handle.abort_handle();
                match tokio::time::timeout_at(deadline, handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Scan worker ended abnormally: {}", e),
                    Err(_) => {
                        warn!("Scan workers did not stop within {:?}", grace);
                        abort.abort();
                        clean = false;
                    }
                }
            } else {
                handle.abort();
            }
        }
        clean
    }
}

async fn run_worker(
    id: usize,
    queue: Arc<TaskQueue>,
    ctx: Arc<StepContext>,
    cancel: CancellationToken,
) {
    while let Some(mut task) = queue.pop(&cancel).await {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = task.step(&ctx) => Some(outcome),
        };

        match outcome {
            None => task.abort(),
            Some(StepOutcome::Terminal(result)) => task.finish(result),
            Some(StepOutcome::Continue) => requeue(&queue, task, Instant::now()),
            Some(StepOutcome::Retry { after }) => requeue(&queue, task, Instant::now() + after),
        }
    }
    debug!("Scan worker {} exiting", id);
}

fn requeue(queue: &TaskQueue, task: ScanTask, ready_at: Instant) {
    if let Err(task) = queue.push_at(task, ready_at) {
        task.abort();
    }
}
