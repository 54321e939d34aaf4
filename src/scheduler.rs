//! The execution engine.
//!
//! The scheduler accepts run requests (immediate or trigger-fired), guards
//! every occurrence with the lock handler configured for its job, wraps it in
//! the listener chain, and delivers exactly one [`JobResult`] per occurrence
//! through its [`JobFuture`].
//!
//! Per occurrence: resolve → cancellation check → non-blocking lock attempt
//! (contention yields a skipped result, listeners still fire, no task runs
//! the body) → before-hooks outer→inner → body with every error captured →
//! after-hooks inner→outer → unconditional lock release → result delivery.
//! Nothing raised inside an occurrence ever unwinds into the scheduler.

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{JobRigError, Result};
use crate::future::JobFuture;
use crate::job::{JobContext, JobParams, JobResult};
use crate::listener::ListenerChain;
use crate::lock::{LockHandler, LockType};
use crate::registry::{JobRegistry, ResolvedJob};
use crate::trigger::Trigger;

/// Orchestrates execution, locking, listener wrapping, and triggers.
///
/// Construct through [`JobRuntimeBuilder`](crate::runtime::JobRuntimeBuilder)
/// and share as `Arc<Scheduler>`; triggers and the CLI all work against the
/// same handle. Avoids any ambient singleton state.
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    lock_handlers: HashMap<LockType, Arc<dyn LockHandler>>,
    listeners: Arc<ListenerChain>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    active: Arc<DashMap<Uuid, JobFuture>>,
    // Self-handle for trigger loops, which outlive the borrow they were
    // spawned from. Always upgradable while the owning Arc is alive.
    handle: Weak<Scheduler>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

impl Scheduler {
    pub(crate) fn new(
        registry: Arc<JobRegistry>,
        lock_handlers: HashMap<LockType, Arc<dyn LockHandler>>,
        listeners: ListenerChain,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|handle| Self {
            registry,
            lock_handlers,
            listeners: Arc::new(listeners),
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            active: Arc::new(DashMap::new()),
            handle: handle.clone(),
        })
    }

    /// The registry backing this scheduler.
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Configured graceful-shutdown grace period.
    pub fn grace_period(&self) -> Duration {
        self.config.graceful_shutdown
    }

    /// Number of occurrences currently tracked (pending or running).
    pub fn active_runs(&self) -> usize {
        self.active.len()
    }

    /// Submit one execution of `name`. Returns immediately with an
    /// independent future; occurrences for the same name still serialize
    /// through the job's lock handler.
    pub fn run_once(&self, name: &str) -> Result<JobFuture> {
        self.run_once_with_params(name, JobParams::new())
    }

    /// Like [`Scheduler::run_once`] with call-time parameter overrides, which
    /// take precedence over both declared defaults and configured overrides.
    pub fn run_once_with_params(&self, name: &str, overrides: JobParams) -> Result<JobFuture> {
        if self.shutdown.is_cancelled() {
            return Err(JobRigError::SchedulerShutDown);
        }

        let resolved = self.registry.resolve(name)?;
        let handler = self
            .lock_handlers
            .get(&resolved.lock)
            .cloned()
            .ok_or_else(|| JobRigError::MissingLockHandler(resolved.lock.to_string()))?;

        let mut params = resolved.params.clone();
        params.extend(overrides);

        let future = JobFuture::new(name);
        let execution_id = Uuid::new_v4();
        self.active.insert(execution_id, future.clone());

        let occurrence = Occurrence {
            resolved,
            params,
            handler,
            listeners: Arc::clone(&self.listeners),
            future: future.clone(),
            execution_id,
        };
        let active = Arc::clone(&self.active);
        self.tracker.spawn(async move {
            occurrence.run().await;
            active.remove(&execution_id);
        });

        Ok(future)
    }

    /// Start a recurring loop for `name`; every firing behaves like an
    /// internally-issued `run_once`. Fails when `name` is unknown.
    pub fn spawn_trigger(&self, name: &str, trigger: Trigger) -> Result<()> {
        if !self.registry.contains(name) {
            return Err(JobRigError::UnknownJob(name.to_string()));
        }
        let Some(scheduler) = self.handle.upgrade() else {
            return Err(JobRigError::SchedulerShutDown);
        };
        let name = name.to_string();
        let shutdown = self.shutdown.clone();

        tracing::info!(job = %name, trigger = %trigger, "trigger registered");

        self.tracker.spawn(async move {
            let Some(first) = trigger.first_delay(Utc::now()) else {
                tracing::warn!(job = %name, "trigger yields no firing time");
                return;
            };
            let mut delay = first;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                match scheduler.run_once(&name) {
                    Ok(_) => {}
                    Err(JobRigError::SchedulerShutDown) => break,
                    Err(error) => {
                        tracing::error!(job = %name, %error, "trigger firing failed");
                    }
                }

                let now = Utc::now();
                match trigger.next_fire(now) {
                    Some(next) => {
                        delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                    }
                    None => break,
                }
            }

            tracing::debug!(job = %name, "trigger loop stopped");
        });

        Ok(())
    }

    /// Start every trigger configured in the registry. Returns the number of
    /// trigger loops started.
    pub fn start_triggers(&self) -> Result<usize> {
        let names = self.registry.triggered_names();
        for name in &names {
            let resolved = self.registry.resolve(name)?;
            // triggered_names only returns entries with a trigger
            if let Some(trigger) = resolved.trigger {
                self.spawn_trigger(name, trigger)?;
            }
        }
        Ok(names.len())
    }

    /// Stop accepting executions, cancel trigger loops, wait up to `grace`
    /// for in-flight runs, then force-cancel the remainder.
    ///
    /// Idempotent and safe to call concurrently with in-flight executions;
    /// repeated calls simply wait again.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            tracing::info!("scheduler shut down cleanly");
            return;
        }

        let remaining = self.active.len();
        tracing::warn!(
            remaining,
            "grace period elapsed, force-cancelling remaining executions"
        );
        for entry in self.active.iter() {
            let future = entry.value();
            future.cancel();
            let mut result = JobResult::cancelled(future.job_name());
            if let Ok(resolved) = self.registry.resolve(future.job_name()) {
                result = result.with_metadata(resolved.metadata);
            }
            future.fulfill(result);
        }
    }

    /// [`Scheduler::shutdown`] with the configured grace period.
    pub async fn shutdown_with_configured_grace(&self) {
        self.shutdown(self.config.graceful_shutdown).await
    }
}

/// One accepted execution, owning everything it needs so the scheduler's own
/// state stays out of the hot path.
struct Occurrence {
    resolved: ResolvedJob,
    params: JobParams,
    handler: Arc<dyn LockHandler>,
    listeners: Arc<ListenerChain>,
    future: JobFuture,
    execution_id: Uuid,
}

impl Occurrence {
    async fn run(self) {
        let name = self.resolved.metadata.name.clone();

        // Cancelled before starting: the body never runs and the lock is
        // never acquired.
        if self.future.cancellation().is_cancelled() {
            let result = JobResult::cancelled(&name).with_metadata(self.resolved.metadata.clone());
            self.fire_hooks_around_skip(&result).await;
            self.future.fulfill(result);
            return;
        }

        // Non-blocking acquisition. Losing the race is a normal outcome, not
        // an error; listeners still observe it.
        let acquired = match self.handler.try_acquire(&name).await {
            Ok(acquired) => acquired,
            Err(error) => {
                tracing::error!(job = %name, %error, "lock acquisition failed");
                let result = JobResult::failure(&name, error.into())
                    .with_metadata(self.resolved.metadata.clone());
                self.fire_hooks_around_skip(&result).await;
                self.future.fulfill(result);
                return;
            }
        };
        if !acquired {
            tracing::debug!(job = %name, execution_id = %self.execution_id, "lock held, skipping");
            let result = JobResult::skipped(&name).with_metadata(self.resolved.metadata.clone());
            self.fire_hooks_around_skip(&result).await;
            self.future.fulfill(result);
            return;
        }

        let result = self.run_locked(&name).await;

        // Release must survive any listener misbehavior above, so it sits
        // after the catch-all hook invocations and has its own error path.
        if let Err(error) = self.handler.release(&name).await {
            tracing::error!(job = %name, %error, "lock release failed");
        }

        self.future.fulfill(result);
    }

    /// Before-hooks, body, after-hooks. The lock is held for the whole of
    /// this; the caller releases it afterwards no matter what happened here.
    async fn run_locked(&self, name: &str) -> JobResult {
        self.guarded_before_run(name).await;

        self.future.mark_running();
        let mut result = if self.future.cancellation().is_cancelled() {
            JobResult::cancelled(name)
        } else {
            self.run_body(name).await
        };

        // A cancellation request wins over whatever the body reported; the
        // two must stay distinguishable for callers.
        if self.future.cancellation().is_cancelled() {
            result = JobResult::cancelled(name);
        }
        result = result.with_metadata(self.resolved.metadata.clone());

        self.guarded_after_run(name, &result).await;
        result
    }

    /// Execute the body on its own task so a panic is captured as a failed
    /// result instead of unwinding into the engine.
    async fn run_body(&self, name: &str) -> JobResult {
        let job = Arc::clone(&self.resolved.job);
        let ctx = JobContext::new(self.params.clone(), self.future.cancellation());

        tracing::debug!(job = %name, execution_id = %self.execution_id, "job body starting");
        let body = tokio::spawn(async move { job.run(&ctx).await });

        match body.await {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => JobResult::failure(name, error),
            Err(join_error) if join_error.is_panic() => {
                JobResult::failure(name, anyhow::anyhow!("job body panicked"))
            }
            Err(_) => JobResult::cancelled(name),
        }
    }

    /// Skip and pre-start-cancel paths still traverse the full chain so
    /// instrumentation sees those occurrences.
    async fn fire_hooks_around_skip(&self, result: &JobResult) {
        self.guarded_before_run(&result.job_name).await;
        self.guarded_after_run(&result.job_name, result).await;
    }

    async fn guarded_before_run(&self, name: &str) {
        let hooks = AssertUnwindSafe(self.listeners.before_run(name, &self.params))
            .catch_unwind()
            .await;
        if hooks.is_err() {
            tracing::error!(job = %name, "job listener panicked in before_run");
        }
    }

    async fn guarded_after_run(&self, name: &str, result: &JobResult) {
        let hooks = AssertUnwindSafe(self.listeners.after_run(name, result))
            .catch_unwind()
            .await;
        if hooks.is_err() {
            tracing::error!(job = %name, "job listener panicked in after_run");
        }
    }
}
