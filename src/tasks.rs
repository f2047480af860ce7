//! Background Tasks
//!
//! Long-running operations (separation, tempo analysis, accompaniment,
//! export) run on their own named thread. The owner polls a [`TaskHandle`]
//! for progress and receives exactly one completion, success or failure.
//! Cancellation is cooperative: the worker checks a shared flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Worker-side view of a task
#[derive(Debug, Clone)]
pub struct TaskContext {
    progress: Sender<u8>,
    cancel: Arc<AtomicBool>,
}

impl TaskContext {
    /// Report a percentage; dropped silently once the owner is gone
    pub fn report(&self, percent: u8) {
        let _ = self.progress.send(percent.min(100));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// The shared cancel flag, for APIs that poll it directly
    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }
}

/// Outcome of one non-blocking poll
#[derive(Debug)]
pub struct TaskPoll<T> {
    /// Progress reported since the last poll, in order
    pub progress: Vec<u8>,
    /// The completion, delivered by exactly one poll
    pub finished: Option<Result<T>>,
}

/// Owner-side handle to a running task
#[derive(Debug)]
pub struct TaskHandle<T> {
    operation: &'static str,
    progress: Receiver<u8>,
    result: Receiver<Result<T>>,
    cancel: Arc<AtomicBool>,
    finished: bool,
    thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Run `work` on a new thread named after `operation`
    ///
    /// # Errors
    /// * `Io` - the thread could not be spawned
    pub fn spawn<F>(operation: &'static str, work: F) -> Result<Self>
    where
        F: FnOnce(&TaskContext) -> Result<T> + Send + 'static,
    {
        let (progress_tx, progress_rx) = channel::unbounded();
        let (result_tx, result_rx) = channel::bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));

        let context = TaskContext {
            progress: progress_tx,
            cancel: Arc::clone(&cancel),
        };

        let thread = thread::Builder::new()
            .name(format!("stemdeck-{}", operation.replace(' ', "-")))
            .spawn(move || {
                let outcome = work(&context);
                if result_tx.send(outcome).is_err() {
                    debug!("[TASK] {} finished after its handle was dropped", operation);
                }
            })?;

        debug!("[TASK] Started {}", operation);
        Ok(Self {
            operation,
            progress: progress_rx,
            result: result_rx,
            cancel,
            finished: false,
            thread: Some(thread),
        })
    }

    /// Ask the worker to stop at its next checkpoint
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        debug!("[TASK] Cancel requested for {}", self.operation);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// True once the completion has been handed out
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Collect pending progress and, if ready, the completion
    pub fn poll(&mut self) -> TaskPoll<T> {
        let progress: Vec<u8> = self.progress.try_iter().collect();
        if self.finished {
            return TaskPoll {
                progress,
                finished: None,
            };
        }

        let finished = match self.result.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.lost_worker())),
        };
        if finished.is_some() {
            self.complete();
        }

        // Progress sent just before completion
        let mut progress = progress;
        if finished.is_some() {
            progress.extend(self.progress.try_iter());
        }
        TaskPoll { progress, finished }
    }

    /// Block until the task completes, forwarding progress to `on_progress`
    pub fn wait_with_progress(mut self, mut on_progress: impl FnMut(u8)) -> Result<T> {
        if self.finished {
            return Err(EngineError::TaskFailed {
                operation: self.operation,
                reason: "result already taken".to_string(),
            });
        }

        let outcome = loop {
            crossbeam::select! {
                recv(self.progress) -> percent => {
                    if let Ok(percent) = percent {
                        on_progress(percent);
                    }
                }
                recv(self.result) -> outcome => {
                    break outcome.unwrap_or_else(|_| Err(self.lost_worker()));
                }
            }
        };
        for percent in self.progress.try_iter() {
            on_progress(percent);
        }
        self.complete();
        outcome
    }

    /// Block until the task completes
    pub fn wait(self) -> Result<T> {
        self.wait_with_progress(|_| {})
    }

    fn complete(&mut self) {
        self.finished = true;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("[TASK] {} worker panicked", self.operation);
            }
        }
    }

    fn lost_worker(&self) -> EngineError {
        EngineError::TaskFailed {
            operation: self.operation,
            reason: "worker stopped without a result".to_string(),
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        // Detach: an abandoned worker stops at its next cancel check
        self.cancel.store(true, Ordering::Relaxed);
    }
}
