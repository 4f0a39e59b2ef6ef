//! Stage Worker Pool
//!
//! Bounded pool of named threads that runs one stage's tasks under a single
//! deadline.
//!
//! ## Cancellation
//! Workers are scoped threads, so a stage never returns while one of its
//! tasks is still running. On the first failure or at the deadline the pool
//! raises the shared [`CancelToken`]; tasks poll it between units of work and
//! bail out, and the scope joins them before the error is reported.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};

use crate::error::{KeyscopeError, Result};

// =============================================================================
// Cancellation Token
// =============================================================================

/// Cooperative cancellation flag shared by the tasks of one stage
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the stage has been cancelled
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(KeyscopeError::Cancelled(stage.to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Worker Pool
// =============================================================================

/// Bounded worker pool for one pipeline stage
#[derive(Debug, Clone)]
pub struct WorkerPool {
    /// Stage name, used for thread names and errors
    name: String,
    /// Worker threads, independent of the task count
    workers: usize,
    /// Bound on the whole batch of tasks
    timeout: Duration,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, workers: usize, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every task and return their results in task order
    ///
    /// Fails as a unit: the first task error, a panic inside a task, or the
    /// deadline cancels the remaining tasks and is returned once every worker
    /// has stopped.
    pub fn run<T, F>(&self, tasks: Vec<F>) -> Result<Vec<T>>
    where
        T: Send,
        F: FnOnce(&CancelToken) -> Result<T> + Send,
    {
        self.run_with_token(tasks, &CancelToken::new())
    }

    /// Same as [`run`](Self::run), cancelling through a caller-owned token
    pub fn run_with_token<T, F>(&self, tasks: Vec<F>, cancel: &CancelToken) -> Result<Vec<T>>
    where
        T: Send,
        F: FnOnce(&CancelToken) -> Result<T> + Send,
    {
        let task_count = tasks.len();
        if task_count == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let deadline = started + self.timeout;

        // Step 1: Queue every task up front; workers pull until the queue drains
        let (task_tx, task_rx) = channel::unbounded::<(usize, F)>();
        for task in tasks.into_iter().enumerate() {
            // Receiver is alive until the end of this function
            let _ = task_tx.send(task);
        }
        drop(task_tx);

        let (result_tx, result_rx) = channel::unbounded::<(usize, Result<T>)>();

        thread::scope(|scope| {
            // Step 2: Spawn the workers
            for worker in 0..self.workers.min(task_count) {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();

                let spawned = thread::Builder::new()
                    .name(format!("{}-{}", self.name, worker))
                    .spawn_scoped(scope, move || {
                        while let Ok((slot, task)) = task_rx.recv() {
                            if cancel.is_cancelled() {
                                break;
                            }
                            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(cancel)))
                                .unwrap_or_else(|payload| {
                                    Err(KeyscopeError::InvariantViolation(format!(
                                        "task panicked: {}",
                                        panic_message(payload.as_ref())
                                    )))
                                });
                            if result_tx.send((slot, outcome)).is_err() {
                                break;
                            }
                        }
                    });

                if let Err(e) = spawned {
                    cancel.cancel();
                    return Err(KeyscopeError::Io(e));
                }
            }
            drop(result_tx);

            // Step 3: Collect results until done, failed, or out of time
            let mut results: Vec<Option<T>> = (0..task_count).map(|_| None).collect();
            let mut received = 0;

            while received < task_count {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match result_rx.recv_timeout(remaining) {
                    Ok((slot, Ok(value))) => {
                        results[slot] = Some(value);
                        received += 1;
                    }
                    Ok((slot, Err(e))) => {
                        tracing::warn!("{} task {} failed: {}", self.name, slot, e);
                        cancel.cancel();
                        return Err(e);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::warn!(
                            "{} stage exceeded {:?}, cancelling {} unfinished task(s)",
                            self.name,
                            self.timeout,
                            task_count - received
                        );
                        cancel.cancel();
                        return Err(KeyscopeError::Timeout {
                            stage: self.name.clone(),
                            elapsed: started.elapsed(),
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        cancel.cancel();
                        return Err(KeyscopeError::InvariantViolation(format!(
                            "{} workers stopped with {} task(s) unfinished",
                            self.name,
                            task_count - received
                        )));
                    }
                }
            }

            Ok(results.into_iter().flatten().collect())
        })
    }
}

/// Best-effort text of a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
