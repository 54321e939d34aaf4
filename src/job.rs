//! Job definitions and the core `Job` trait.
//!
//! A job is a named, stateless unit of work: it declares static
//! [`JobMetadata`] once at registration time and implements an async `run`
//! body. Any state a run needs must arrive through its parameters; the
//! runtime never carries state between invocations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Effective parameters passed to a job body: declared defaults overlaid by
/// configuration overrides, configuration winning on conflict.
pub type JobParams = HashMap<String, serde_json::Value>;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// A single declared parameter with an optional code-level default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobParameter {
    /// Parameter name, unique within a job.
    pub name: String,
    /// Code-level default. `None` means the parameter must come from
    /// configuration or a run-time override to be present at all.
    pub default: Option<serde_json::Value>,
}

/// Static description of a job: name, declared parameters, and the names of
/// jobs it depends on. Immutable after registration.
///
/// `depends_on` is advisory metadata for callers and orchestrators; the
/// scheduler does not expand it into an execution graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Unique job name.
    pub name: String,
    /// Declared parameters, in declaration order.
    pub parameters: Vec<JobParameter>,
    /// Names of jobs this job declares a dependency on.
    pub depends_on: Vec<String>,
}

impl JobMetadata {
    /// Start building metadata for a named job.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    /// Declare a parameter with a default value.
    pub fn param(mut self, name: impl Into<String>, default: serde_json::Value) -> Self {
        self.parameters.push(JobParameter {
            name: name.into(),
            default: Some(default),
        });
        self
    }

    /// Declare a parameter with no default.
    pub fn required_param(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(JobParameter {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Declare a dependency on another job.
    pub fn depends_on(mut self, job_name: impl Into<String>) -> Self {
        self.depends_on.push(job_name.into());
        self
    }

    /// Collect the declared defaults into a parameter map.
    pub fn default_params(&self) -> JobParams {
        self.parameters
            .iter()
            .filter_map(|p| p.default.clone().map(|v| (p.name.clone(), v)))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Outcome
// ═══════════════════════════════════════════════════════════════════════════════

/// Final outcome of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// The body completed normally.
    Success,
    /// The body completed but reported a problem worth surfacing.
    Warning,
    /// The body returned an error or panicked.
    Failure,
    /// The occurrence lost the lock race and never ran.
    Skipped,
    /// The occurrence was cancelled before or during the run.
    Cancelled,
    /// The body finished without reporting an outcome.
    Unknown,
}

impl JobOutcome {
    /// Whether this outcome counts as success for exit-code purposes.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Failure => write!(f, "failure"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Result
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable record of one execution, produced exactly once per accepted
/// occurrence — including occurrences that failed, were skipped on lock
/// contention, or were cancelled.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// Name of the job this result belongs to.
    pub job_name: String,
    /// Final outcome.
    pub outcome: JobOutcome,
    /// Optional human-readable message.
    pub message: Option<String>,
    /// Captured error for failed executions. Arc-wrapped so results stay
    /// cheaply cloneable through the future's result channel.
    pub cause: Option<Arc<anyhow::Error>>,
    /// Metadata of the executed job. Attached by the scheduler on delivery;
    /// results built inside a job body carry `None` until then.
    pub metadata: Option<JobMetadata>,
}

impl JobResult {
    pub fn success(job_name: impl Into<String>) -> Self {
        Self::with_outcome(job_name, JobOutcome::Success)
    }

    pub fn warning(job_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_outcome(job_name, JobOutcome::Warning).message(message)
    }

    pub fn failure(job_name: impl Into<String>, cause: anyhow::Error) -> Self {
        let mut result = Self::with_outcome(job_name, JobOutcome::Failure);
        result.message = Some(cause.to_string());
        result.cause = Some(Arc::new(cause));
        result
    }

    pub fn skipped(job_name: impl Into<String>) -> Self {
        Self::with_outcome(job_name, JobOutcome::Skipped)
            .message("lock is held by another execution")
    }

    pub fn cancelled(job_name: impl Into<String>) -> Self {
        Self::with_outcome(job_name, JobOutcome::Cancelled)
    }

    pub fn unknown(job_name: impl Into<String>) -> Self {
        Self::with_outcome(job_name, JobOutcome::Unknown)
    }

    fn with_outcome(job_name: impl Into<String>, outcome: JobOutcome) -> Self {
        Self {
            job_name: job_name.into(),
            outcome,
            message: None,
            cause: None,
            metadata: None,
        }
    }

    /// Attach a message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach the executed job's metadata.
    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.job_name, self.outcome)?;
        if let Some(message) = &self.message {
            write!(f, " ({})", message)?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Execution context passed to a job body: the effective parameters and a
/// cooperative cancellation signal.
#[derive(Debug, Clone)]
pub struct JobContext {
    params: JobParams,
    cancellation: CancellationToken,
}

impl JobContext {
    pub fn new(params: JobParams, cancellation: CancellationToken) -> Self {
        Self {
            params,
            cancellation,
        }
    }

    /// All effective parameters.
    pub fn params(&self) -> &JobParams {
        &self.params
    }

    /// A single parameter by name.
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.get(name)
    }

    /// Whether cancellation has been requested. Long-running bodies should
    /// poll this (or await [`JobContext::cancelled`]) and exit early.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// The trait every job implements.
///
/// # Errors
///
/// An `Err` returned from `run` is captured by the scheduler and converted to
/// a `Failure` result; it never unwinds past the execution boundary. Jobs may
/// also return a non-success [`JobResult`] themselves (e.g. a warning).
#[async_trait]
pub trait Job: Send + Sync {
    /// Static metadata: name, declared parameters, dependencies.
    fn metadata(&self) -> JobMetadata;

    /// Execute one occurrence.
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<JobResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_builder() {
        let metadata = JobMetadata::named("sync")
            .param("batch_size", json!(100))
            .required_param("target")
            .depends_on("prepare");

        assert_eq!(metadata.name, "sync");
        assert_eq!(metadata.parameters.len(), 2);
        assert_eq!(metadata.depends_on, vec!["prepare".to_string()]);
    }

    #[test]
    fn test_default_params_skip_required() {
        let metadata = JobMetadata::named("sync")
            .param("batch_size", json!(100))
            .required_param("target");

        let defaults = metadata.default_params();
        assert_eq!(defaults.get("batch_size"), Some(&json!(100)));
        assert!(!defaults.contains_key("target"));
    }

    #[test]
    fn test_result_constructors() {
        let ok = JobResult::success("a");
        assert_eq!(ok.outcome, JobOutcome::Success);
        assert!(ok.outcome.is_success());

        let failed = JobResult::failure("b", anyhow::anyhow!("boom"));
        assert_eq!(failed.outcome, JobOutcome::Failure);
        assert!(failed.cause.is_some());
        assert_eq!(failed.message.as_deref(), Some("boom"));

        let skipped = JobResult::skipped("c");
        assert_eq!(skipped.outcome, JobOutcome::Skipped);
        assert!(!skipped.outcome.is_success());
    }

    #[test]
    fn test_result_metadata_attachment() {
        let result = JobResult::success("sync");
        assert!(result.metadata.is_none());

        let metadata = JobMetadata::named("sync").param("batch_size", json!(100));
        let result = result.with_metadata(metadata);
        assert_eq!(result.metadata.as_ref().unwrap().name, "sync");
        assert_eq!(result.metadata.unwrap().parameters.len(), 1);
    }

    #[test]
    fn test_result_display() {
        let result = JobResult::warning("cleanup", "3 files left behind");
        assert_eq!(
            result.to_string(),
            "cleanup: warning (3 files left behind)"
        );
    }

    #[test]
    fn test_context_cancellation() {
        let token = CancellationToken::new();
        let ctx = JobContext::new(JobParams::new(), token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
