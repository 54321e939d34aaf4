//! Configuration management.
//!
//! Configuration is loaded once at startup (file plus `JOBRIG__`-prefixed
//! environment variables) and turned into an immutable registry. Malformed
//! entries fail startup with a descriptive error; a partial registry is never
//! constructed.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::lock::LockType;
use crate::telemetry::LoggingConfig;

/// Main runtime configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-job definitions, keyed by job name. Jobs with no entry run with
    /// all-default parameters and a local lock.
    #[serde(default)]
    pub jobs: HashMap<String, JobDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// How long `shutdown` waits for in-flight executions before
    /// force-cancelling them.
    #[serde(default = "default_graceful_shutdown", with = "humantime_serde")]
    pub graceful_shutdown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            graceful_shutdown: default_graceful_shutdown(),
        }
    }
}

/// Configuration-sourced overrides for one job. Overlays the code-level
/// [`JobMetadata`](crate::job::JobMetadata); configuration wins on conflict.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobDefinition {
    /// Parameter value overrides.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,

    /// Dependency-list override. `None` keeps the code-declared list.
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,

    /// Which lock handler guards this job's executions.
    #[serde(default)]
    pub lock: LockType,

    /// Optional recurring trigger.
    #[serde(default)]
    pub trigger: Option<TriggerSpec>,
}

/// Trigger specification as written in configuration. Parsed into a
/// [`Trigger`](crate::trigger::Trigger) at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TriggerSpec {
    /// Cron expression, e.g. `cron = "0 0 * * * *"`.
    Cron { cron: String },
    /// Fixed-rate firing, e.g. `every = "30s"`, optional `initial_delay`.
    FixedRate {
        #[serde(with = "humantime_serde")]
        every: Duration,
        #[serde(default, with = "humantime_serde")]
        initial_delay: Option<Duration>,
    },
}

// Default value functions
fn default_graceful_shutdown() -> Duration {
    Duration::from_secs(30)
}

impl Config {
    /// Load configuration from the environment only.
    pub fn load() -> crate::error::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("JOBRIG").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("JOBRIG").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
