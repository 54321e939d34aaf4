//! Cancellable handles to in-flight executions.
//!
//! A [`JobFuture`] is created when the scheduler accepts a run request and
//! carries exactly one pending [`JobResult`] slot, fulfilled exactly once.
//! Waiting on it never affects the underlying execution: a timed-out wait
//! leaves the run going, and a later wait still observes the eventual result.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{JobRigError, Result};
use crate::job::JobResult;

/// Lifecycle of one accepted run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    /// Accepted, body not started.
    Pending,
    /// Body is executing.
    Running,
    /// Result delivered.
    Done,
    /// Cancelled before completion.
    Cancelled,
}

struct FutureInner {
    job_name: String,
    state: Mutex<FutureState>,
    result_tx: watch::Sender<Option<JobResult>>,
    cancellation: CancellationToken,
}

/// Awaitable, cancellable handle to one execution. Cheap to clone; every
/// clone observes the same result.
#[derive(Clone)]
pub struct JobFuture {
    inner: Arc<FutureInner>,
}

impl JobFuture {
    pub(crate) fn new(job_name: impl Into<String>) -> Self {
        let (result_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(FutureInner {
                job_name: job_name.into(),
                state: Mutex::new(FutureState::Pending),
                result_tx,
                cancellation: CancellationToken::new(),
            }),
        }
    }

    /// Name of the job this handle tracks.
    pub fn job_name(&self) -> &str {
        &self.inner.job_name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FutureState {
        *self.inner.state.lock()
    }

    /// The result, if already delivered.
    pub fn try_result(&self) -> Option<JobResult> {
        self.inner.result_tx.borrow().clone()
    }

    /// Wait until the job is done and return its result.
    pub async fn await_result(&self) -> JobResult {
        let mut rx = self.inner.result_tx.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                // The sender lives inside this handle, so this arm is
                // unreachable while any clone exists.
                return JobResult::unknown(self.job_name());
            }
        }
    }

    /// Wait up to `timeout` for the result. Elapsing yields
    /// [`JobRigError::FutureTimeout`] without disturbing the execution.
    pub async fn await_timeout(&self, timeout: Duration) -> Result<JobResult> {
        tokio::time::timeout(timeout, self.await_result())
            .await
            .map_err(|_| JobRigError::FutureTimeout(self.inner.job_name.clone()))
    }

    /// Request cancellation.
    ///
    /// Before the body starts this prevents it from ever running (the lock is
    /// never acquired). While running it requests cooperative interruption;
    /// the body is expected to observe it and exit. Returns `false` when the
    /// execution already finished.
    pub fn cancel(&self) -> bool {
        let state = self.inner.state.lock();
        match *state {
            FutureState::Done | FutureState::Cancelled => false,
            FutureState::Pending | FutureState::Running => {
                drop(state);
                self.inner.cancellation.cancel();
                true
            }
        }
    }

    /// Shortcut for [`JobFuture::cancel`], matching interrupting-cancel
    /// callers.
    pub fn cancel_interruptibly(&self) -> bool {
        self.cancel()
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.inner.cancellation.clone()
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.inner.state.lock();
        if *state == FutureState::Pending {
            *state = FutureState::Running;
        }
    }

    /// Deliver the result. The first delivery wins; later calls are ignored
    /// so every execution path can unconditionally report.
    pub(crate) fn fulfill(&self, result: JobResult) {
        let mut state = self.inner.state.lock();
        if self.inner.result_tx.borrow().is_some() {
            tracing::debug!(
                job = %self.inner.job_name,
                "duplicate result delivery ignored"
            );
            return;
        }
        *state = match result.outcome {
            crate::job::JobOutcome::Cancelled => FutureState::Cancelled,
            _ => FutureState::Done,
        };
        self.inner.result_tx.send_replace(Some(result));
    }
}

impl fmt::Debug for JobFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFuture")
            .field("job_name", &self.inner.job_name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOutcome;

    #[tokio::test]
    async fn test_fulfill_once() {
        let future = JobFuture::new("sync");
        assert_eq!(future.state(), FutureState::Pending);

        future.fulfill(JobResult::success("sync"));
        future.fulfill(JobResult::failure("sync", anyhow::anyhow!("late")));

        let result = future.await_result().await;
        assert_eq!(result.outcome, JobOutcome::Success);
        assert_eq!(future.state(), FutureState::Done);
    }

    #[tokio::test]
    async fn test_all_clones_observe_result() {
        let future = JobFuture::new("sync");
        let clone = future.clone();

        let waiter = tokio::spawn(async move { clone.await_result().await });
        future.fulfill(JobResult::success("sync"));

        assert_eq!(waiter.await.unwrap().outcome, JobOutcome::Success);
        assert_eq!(future.await_result().await.outcome, JobOutcome::Success);
    }

    #[tokio::test]
    async fn test_timeout_then_result() {
        let future = JobFuture::new("slow");

        let err = future
            .await_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, JobRigError::FutureTimeout(_)));

        // The slot is untouched; a later wait sees the eventual result.
        future.fulfill(JobResult::success("slow"));
        assert_eq!(future.await_result().await.outcome, JobOutcome::Success);
    }

    #[tokio::test]
    async fn test_cancel_transitions() {
        let future = JobFuture::new("sync");
        assert!(future.cancel());
        assert!(future.cancellation().is_cancelled());

        future.fulfill(JobResult::cancelled("sync"));
        assert_eq!(future.state(), FutureState::Cancelled);

        // Cancelling a finished future is a no-op.
        assert!(!future.cancel());
        assert!(!future.cancel_interruptibly());
    }
}
