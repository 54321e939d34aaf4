//! Error handling for the jobrig runtime.
//!
//! Two propagation regimes apply:
//!
//! - Startup errors (`DuplicateJobName`, `InvalidJobDefinition`, configuration
//!   failures) surface through `Result` and prevent the scheduler from
//!   becoming ready.
//! - Errors inside a single execution are contained and surfaced only through
//!   that execution's [`JobResult`](crate::job::JobResult); they never unwind
//!   into the scheduler's control flow.

use thiserror::Error;

/// A specialized Result type for jobrig operations.
pub type Result<T> = std::result::Result<T, JobRigError>;

/// Errors raised by the runtime outside of individual job executions.
#[derive(Debug, Error)]
pub enum JobRigError {
    /// A run was requested for a name that is not in the registry.
    /// Fatal to the requesting call, not to the scheduler.
    #[error("unknown job '{0}'")]
    UnknownJob(String),

    /// Two jobs were registered under the same name. Startup-time fatal.
    #[error("duplicate job name '{0}'")]
    DuplicateJobName(String),

    /// A configured job definition could not be applied.
    #[error("invalid definition for job '{job}': {reason}")]
    InvalidJobDefinition { job: String, reason: String },

    /// A trigger specification could not be parsed.
    #[error("invalid trigger '{spec}': {reason}")]
    InvalidTrigger { spec: String, reason: String },

    /// No lock handler is bound for the lock type a job is configured with.
    /// Absence of a handler entry is an error, not a no-op.
    #[error("no lock handler bound for lock type '{0}'")]
    MissingLockHandler(String),

    /// Configuration could not be loaded or deserialized.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The coordination service backing the clustered lock failed.
    #[error("coordination service error: {0}")]
    Coordination(String),

    /// A run was submitted after shutdown began.
    #[error("scheduler is shut down")]
    SchedulerShutDown,

    /// `await_timeout` elapsed before the job finished. The underlying
    /// execution keeps running.
    #[error("timed out waiting for job '{0}'")]
    FutureTimeout(String),
}

impl From<config::ConfigError> for JobRigError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = JobRigError::UnknownJob("nightly-sync".to_string());
        assert_eq!(err.to_string(), "unknown job 'nightly-sync'");

        let err = JobRigError::InvalidTrigger {
            spec: "not-a-cron".to_string(),
            reason: "expected 6 or 7 fields".to_string(),
        };
        assert!(err.to_string().contains("not-a-cron"));
    }

    #[test]
    fn test_config_error_conversion() {
        let cfg_err = config::ConfigError::Message("bad value".to_string());
        let err: JobRigError = cfg_err.into();
        assert!(matches!(err, JobRigError::Configuration(_)));
    }
}
