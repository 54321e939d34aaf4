//! # jobrig
//!
//! Job-scheduling runtime: register named jobs, run them on demand or on
//! cron/fixed-rate triggers, and observe every execution through listeners.
//!
//! ## Architecture
//!
//! - **Registry**: Named jobs with declared parameters, merged with
//!   configuration overrides at startup
//! - **Scheduler**: Immediate and trigger-fired execution with graceful
//!   shutdown
//! - **Locking**: Per-job mutual exclusion, in-process or cluster-wide
//!   through a coordination service
//! - **Listeners**: Ordered before/after hooks nested around every run
//! - **Futures**: Handles to in-flight executions with wait, timeout, and
//!   cooperative cancellation

pub mod cli;
pub mod config;
pub mod error;
pub mod future;
pub mod job;
pub mod listener;
pub mod lock;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod telemetry;
pub mod trigger;

pub use error::{JobRigError, Result};
pub use future::{FutureState, JobFuture};
pub use job::{Job, JobContext, JobMetadata, JobOutcome, JobParameter, JobParams, JobResult};
pub use runtime::JobRuntimeBuilder;
pub use scheduler::Scheduler;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, JobDefinition, TriggerSpec};
    pub use crate::error::{JobRigError, Result};
    pub use crate::future::{FutureState, JobFuture};
    pub use crate::job::{
        Job, JobContext, JobMetadata, JobOutcome, JobParameter, JobParams, JobResult,
    };
    pub use crate::listener::{JobListener, MappedListener};
    pub use crate::lock::{CoordinationClient, LockHandler, LockType};
    pub use crate::runtime::JobRuntimeBuilder;
    pub use crate::scheduler::Scheduler;
    pub use crate::trigger::Trigger;
}
