//! Runtime assembly.
//!
//! [`JobRuntimeBuilder`] collects jobs, listeners, lock handlers, and
//! configuration, validates the combination once, and produces a ready
//! [`Scheduler`]. All wiring errors (duplicate names, definitions for
//! unregistered jobs, unparsable triggers, a lock type with no handler)
//! surface here, before anything runs.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{JobRigError, Result};
use crate::job::Job;
use crate::listener::{JobListener, ListenerChain, LogListener, MappedListener, LOG_LISTENER_ORDER};
use crate::lock::{
    ClusteredLockHandler, InMemoryCoordination, LockHandler, LockType, LocalLockHandler,
};
use crate::registry::JobRegistry;
use crate::scheduler::Scheduler;

/// Builder for a fully wired scheduler.
///
/// A local lock handler and a log listener are installed by default; a
/// clustered handler must be bound explicitly, since it needs a coordination
/// backend only the embedding application can choose.
pub struct JobRuntimeBuilder {
    jobs: Vec<Arc<dyn Job>>,
    mapped_listeners: Vec<MappedListener>,
    unordered_listeners: Vec<Arc<dyn JobListener>>,
    lock_handlers: HashMap<LockType, Arc<dyn LockHandler>>,
    config: Config,
    log_listener: bool,
}

impl Default for JobRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            mapped_listeners: Vec::new(),
            unordered_listeners: Vec::new(),
            lock_handlers: HashMap::new(),
            config: Config::default(),
            log_listener: true,
        }
    }

    /// Use the given configuration for job definitions and scheduler tuning.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Register a job.
    pub fn job<J: Job + 'static>(mut self, job: J) -> Self {
        self.jobs.push(Arc::new(job));
        self
    }

    /// Register an already-shared job.
    pub fn shared_job(mut self, job: Arc<dyn Job>) -> Self {
        self.jobs.push(job);
        self
    }

    /// Add a listener at an explicit chain position. Lower orders sit
    /// further out in the nesting.
    pub fn listener(mut self, listener: Arc<dyn JobListener>, order: i32) -> Self {
        self.mapped_listeners
            .push(MappedListener::new(listener, order));
        self
    }

    /// Add a listener with no explicit order; it nests innermost, after all
    /// ordered listeners.
    pub fn unordered_listener(mut self, listener: Arc<dyn JobListener>) -> Self {
        self.unordered_listeners.push(listener);
        self
    }

    /// Bind a lock handler for a lock type, replacing any previous binding.
    pub fn lock_handler(mut self, lock: LockType, handler: Arc<dyn LockHandler>) -> Self {
        self.lock_handlers.insert(lock, handler);
        self
    }

    /// Bind the clustered lock type to an in-memory coordination session.
    /// Gives single-node deployments working clustered-job configs without a
    /// real coordination service.
    pub fn in_memory_clustered_locks(self) -> Self {
        let service = Arc::new(InMemoryCoordination::new());
        let session = Arc::new(service.connect());
        self.lock_handler(
            LockType::Clustered,
            Arc::new(ClusteredLockHandler::new(session)),
        )
    }

    /// Skip installing the default logging listener.
    pub fn without_log_listener(mut self) -> Self {
        self.log_listener = false;
        self
    }

    /// Validate everything and produce the scheduler.
    pub fn build(mut self) -> Result<Arc<Scheduler>> {
        let registry = Arc::new(JobRegistry::new(self.jobs, &self.config.jobs)?);

        self.lock_handlers
            .entry(LockType::Local)
            .or_insert_with(|| Arc::new(LocalLockHandler::new()));

        // Every configured lock type must be backed now, not on first firing.
        for name in registry.names() {
            let resolved = registry.resolve(&name)?;
            if !self.lock_handlers.contains_key(&resolved.lock) {
                return Err(JobRigError::MissingLockHandler(resolved.lock.to_string()));
            }
        }

        if self.log_listener {
            self.mapped_listeners
                .push(MappedListener::new(Arc::new(LogListener), LOG_LISTENER_ORDER));
        }
        let listeners = ListenerChain::new(self.mapped_listeners, self.unordered_listeners);

        Ok(Scheduler::new(
            registry,
            self.lock_handlers,
            listeners,
            self.config.scheduler.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobDefinition;
    use crate::job::{JobContext, JobMetadata, JobOutcome, JobResult};
    use async_trait::async_trait;

    struct NoopJob {
        name: &'static str,
    }

    #[async_trait]
    impl Job for NoopJob {
        fn metadata(&self) -> JobMetadata {
            JobMetadata::named(self.name)
        }

        async fn run(&self, _ctx: &JobContext) -> anyhow::Result<JobResult> {
            Ok(JobResult::success(self.name))
        }
    }

    #[tokio::test]
    async fn test_build_and_run_with_defaults() {
        let scheduler = JobRuntimeBuilder::new()
            .job(NoopJob { name: "noop" })
            .build()
            .unwrap();

        let result = scheduler.run_once("noop").unwrap().await_result().await;
        assert_eq!(result.outcome, JobOutcome::Success);
    }

    #[tokio::test]
    async fn test_duplicate_job_name_is_fatal() {
        let err = JobRuntimeBuilder::new()
            .job(NoopJob { name: "noop" })
            .job(NoopJob { name: "noop" })
            .build()
            .unwrap_err();
        assert!(matches!(err, JobRigError::DuplicateJobName(_)));
    }

    #[tokio::test]
    async fn test_clustered_job_requires_bound_handler() {
        let mut config = Config::default();
        config.jobs.insert(
            "noop".to_string(),
            JobDefinition {
                lock: LockType::Clustered,
                ..Default::default()
            },
        );

        let err = JobRuntimeBuilder::new()
            .with_config(config.clone())
            .job(NoopJob { name: "noop" })
            .build()
            .unwrap_err();
        assert!(matches!(err, JobRigError::MissingLockHandler(_)));

        // Binding the in-memory backend makes the same setup valid.
        let scheduler = JobRuntimeBuilder::new()
            .with_config(config)
            .job(NoopJob { name: "noop" })
            .in_memory_clustered_locks()
            .build()
            .unwrap();
        let result = scheduler.run_once("noop").unwrap().await_result().await;
        assert_eq!(result.outcome, JobOutcome::Success);
    }
}
