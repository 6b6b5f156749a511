//! Single background worker with cooperative cancellation
//!
//! Every background loop in the gateway (message dispatcher, device
//! receivers, periodic publishers) runs on a [`ManagedWorker`]. At most one
//! task is live per worker; reconfiguration stops the old task before the
//! new one starts.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default time a stopping task gets to observe cancellation
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Running,
    Cancelling,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Running => "running",
            WorkerStatus::Cancelling => "cancelling",
        };
        write!(f, "{}", s)
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running
    NotRunning,
    /// The task exited within the stop timeout
    Stopped,
    /// The task ignored cancellation and was aborted
    Aborted,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkerError {
    #[error("Worker '{0}' is already running")]
    AlreadyRunning(String),
}

/// Cancellation signal handed to a worker task
///
/// Tasks check it at every blocking boundary: either poll
/// [`is_cancelled`](Self::is_cancelled) between iterations or race
/// [`cancelled`](Self::cancelled) against their next await.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested or the owning worker is gone
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration`; returns false if cancelled first
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

struct RunningTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owner of at most one background task
pub struct ManagedWorker {
    name: String,
    stop_timeout: Duration,
    slot: Mutex<Option<RunningTask>>,
    status: parking_lot::RwLock<WorkerStatus>,
}

impl ManagedWorker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_stop_timeout(name, DEFAULT_STOP_TIMEOUT)
    }

    pub fn with_stop_timeout(name: impl Into<String>, stop_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            stop_timeout,
            slot: Mutex::new(None),
            status: parking_lot::RwLock::new(WorkerStatus::Idle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. A task that finished on its own reports Idle.
    pub fn status(&self) -> WorkerStatus {
        let status = *self.status.read();
        if status == WorkerStatus::Running {
            if let Ok(slot) = self.slot.try_lock() {
                if slot.as_ref().map_or(true, |t| t.handle.is_finished()) {
                    return WorkerStatus::Idle;
                }
            }
        }
        status
    }

    pub fn is_running(&self) -> bool {
        self.status() == WorkerStatus::Running
    }

    /// Spawn `work` with a fresh cancellation token.
    ///
    /// Fails with [`WorkerError::AlreadyRunning`] while a previous task is live.
    pub async fn start<F, Fut>(&self, work: F) -> Result<(), WorkerError>
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock().await;
        self.start_locked(&mut slot, work)
    }

    /// Signal cancellation and wait up to the stop timeout for the task to
    /// exit; a task still running after that is aborted. Always ends Idle.
    pub async fn stop(&self) -> StopOutcome {
        let mut slot = self.slot.lock().await;
        self.stop_locked(&mut slot).await
    }

    /// Stop the current task (if any) and start `work`, holding the worker
    /// lock throughout so overlapping restarts serialize.
    pub async fn restart<F, Fut>(&self, work: F) -> Result<StopOutcome, WorkerError>
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock().await;
        let outcome = self.stop_locked(&mut slot).await;
        self.start_locked(&mut slot, work)?;
        Ok(outcome)
    }

    fn start_locked<F, Fut>(
        &self,
        slot: &mut Option<RunningTask>,
        work: F,
    ) -> Result<(), WorkerError>
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(task) = slot.as_ref() {
            if !task.handle.is_finished() {
                return Err(WorkerError::AlreadyRunning(self.name.clone()));
            }
        }

        let (cancel, rx) = watch::channel(false);
        let handle = tokio::spawn(work(CancelToken { rx }));
        *slot = Some(RunningTask { cancel, handle });
        *self.status.write() = WorkerStatus::Running;

        debug!(worker = %self.name, "Worker started");
        Ok(())
    }

    async fn stop_locked(&self, slot: &mut Option<RunningTask>) -> StopOutcome {
        let Some(task) = slot.take() else {
            return StopOutcome::NotRunning;
        };

        *self.status.write() = WorkerStatus::Cancelling;
        let _ = task.cancel.send(true);

        let mut handle = task.handle;
        let outcome = match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => StopOutcome::Stopped,
            Ok(Err(e)) => {
                if e.is_panic() {
                    error!(worker = %self.name, "Worker task panicked");
                }
                StopOutcome::Stopped
            }
            Err(_) => {
                warn!(
                    worker = %self.name,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Worker did not stop in time, aborting"
                );
                handle.abort();
                StopOutcome::Aborted
            }
        };

        *self.status.write() = WorkerStatus::Idle;
        debug!(worker = %self.name, ?outcome, "Worker stopped");
        outcome
    }
}

impl Drop for ManagedWorker {
    fn drop(&mut self) {
        if let Some(task) = self.slot.get_mut().take() {
            task.handle.abort();
        }
    }
}
