//! FIFO of scan tasks with deferred re-entry.
//!
//! Every entry carries a "not before" instant. [`TaskQueue::pop`] hands out
//! the first entry in FIFO order whose instant has passed; when none is ready
//! the caller sleeps until the earliest instant, a push, a resume or
//! cancellation, whichever comes first. A closed queue rejects pushes and
//! returns the task to the caller, so nothing is dropped silently.

use crate::cancel::CancellationToken;
use crate::task::ScanTask;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;

struct Entry {
    task: ScanTask,
    ready_at: Instant,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    closed: bool,
    paused: bool,
}

#[derive(Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a task that is ready immediately.
    pub fn push(&self, task: ScanTask) -> Result<(), ScanTask> {
        self.push_at(task, Instant::now())
    }

    /// Append a task that must not be handed out before `ready_at`.
    pub fn push_at(&self, task: ScanTask, ready_at: Instant) -> Result<(), ScanTask> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(task);
            }
            state.entries.push_back(Entry { task, ready_at });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next ready task. `None` once the queue is closed or
    /// `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<ScanTask> {
        loop {
            let notified = self.notify.notified();
            let wake_at = {
                let mut state = self.lock();
                if state.closed || cancel.is_cancelled() {
                    return None;
                }
                if state.paused {
                    None
                } else {
                    let now = Instant::now();
                    if let Some(idx) = state.entries.iter().position(|e| e.ready_at <= now) {
                        return state.entries.remove(idx).map(|e| e.task);
                    }
                    state.entries.iter().map(|e| e.ready_at).min()
                }
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                        _ = cancel.cancelled() => return None,
                    }
                }
                None => {
                    tokio::select! {
                        _ = notified => {}
                        _ = cancel.cancelled() => return None,
                    }
                }
            }
        }
    }

    /// Close the queue and hand back everything still in it.
    pub fn close_and_drain(&self) -> Vec<ScanTask> {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            state.entries.drain(..).map(|e| e.task).collect()
        };
        self.notify.notify_waiters();
        drained
    }

    /// Stop handing out tasks. Pushes are still accepted.
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        self.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Tasks waiting in the queue (not counting tasks being executed).
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
