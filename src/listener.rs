//! Ordered execution listeners.
//!
//! Listeners wrap every execution onion-style: ascending order runs
//! outer→inner before the body and mirrored inner→outer afterwards, for every
//! occurrence — successes, failures, skips, and cancellations alike, so
//! instrumentation sees all of them.
//!
//! A failing hook is logged and reported through its own error; it never
//! alters the job outcome, blocks later hooks in the cleanup path, or keeps
//! the lock held.

use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;

use crate::job::{JobParams, JobResult};

/// The outermost band is reserved for a transactional listener; order other
/// listeners relative to it with higher values.
pub const BUSINESS_TX_LISTENER_ORDER: i32 = i32::MIN + 800;

/// The built-in log listener sits just inside the transactional band.
pub const LOG_LISTENER_ORDER: i32 = BUSINESS_TX_LISTENER_ORDER + 200;

/// Order assigned to listeners registered without one: innermost, after all
/// explicitly-ordered listeners.
pub const UNORDERED_LISTENER_ORDER: i32 = i32::MAX;

/// Interceptor around job executions.
#[async_trait]
pub trait JobListener: Send + Sync {
    /// Invoked before the job body (outer→inner across the chain).
    async fn before_run(&self, _job_name: &str, _params: &JobParams) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked after the result is known (inner→outer across the chain).
    async fn after_run(&self, _job_name: &str, _result: &JobResult) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A listener paired with its position in the chain. Lower order = outer
/// layer; ties resolve in registration order.
#[derive(Clone)]
pub struct MappedListener {
    pub listener: Arc<dyn JobListener>,
    pub order: i32,
}

impl MappedListener {
    pub fn new(listener: Arc<dyn JobListener>, order: i32) -> Self {
        Self { listener, order }
    }
}

/// The composed chain, sorted once at scheduler-build time.
#[derive(Clone, Default)]
pub struct ListenerChain {
    listeners: Vec<MappedListener>,
}

impl ListenerChain {
    /// Compose explicitly-ordered listeners and bare ones. Bare listeners are
    /// placed innermost, keeping their registration order among themselves;
    /// the sort is stable so equal orders never reshuffle. No dedup is
    /// attempted between the two collections.
    pub fn new(
        mapped: Vec<MappedListener>,
        unordered: Vec<Arc<dyn JobListener>>,
    ) -> Self {
        let mut listeners = mapped;
        listeners.extend(
            unordered
                .into_iter()
                .map(|l| MappedListener::new(l, UNORDERED_LISTENER_ORDER)),
        );
        listeners.sort_by_key(|m| m.order);
        Self { listeners }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Fire before-hooks outer→inner. Hook errors are logged and swallowed;
    /// every listener is still reached and the body still runs.
    pub async fn before_run(&self, job_name: &str, params: &JobParams) {
        for mapped in &self.listeners {
            if let Err(error) = mapped.listener.before_run(job_name, params).await {
                tracing::warn!(
                    job = job_name,
                    order = mapped.order,
                    %error,
                    "job listener failed in before_run"
                );
            }
        }
    }

    /// Fire after-hooks inner→outer, mirroring `before_run`.
    pub async fn after_run(&self, job_name: &str, result: &JobResult) {
        for mapped in self.listeners.iter().rev() {
            if let Err(error) = mapped.listener.after_run(job_name, result).await {
                tracing::warn!(
                    job = job_name,
                    order = mapped.order,
                    %error,
                    "job listener failed in after_run"
                );
            }
        }
    }
}

/// Built-in listener: one log line per completed occurrence, plus outcome
/// counters.
#[derive(Debug, Default)]
pub struct LogListener;

#[async_trait]
impl JobListener for LogListener {
    async fn before_run(&self, job_name: &str, _params: &JobParams) -> anyhow::Result<()> {
        tracing::debug!(job = job_name, "job starting");
        Ok(())
    }

    async fn after_run(&self, job_name: &str, result: &JobResult) -> anyhow::Result<()> {
        tracing::info!(
            job = job_name,
            outcome = %result.outcome,
            "job finished"
        );
        counter!(
            "jobrig_runs_total",
            "job" => job_name.to_string(),
            "outcome" => result.outcome.to_string()
        )
        .increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records its hook invocations into a shared trace.
    struct TracingListener {
        tag: &'static str,
        trace: Arc<Mutex<Vec<String>>>,
        fail_before: bool,
    }

    impl TracingListener {
        fn new(tag: &'static str, trace: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                tag,
                trace,
                fail_before: false,
            }
        }
    }

    #[async_trait]
    impl JobListener for TracingListener {
        async fn before_run(&self, _job: &str, _params: &JobParams) -> anyhow::Result<()> {
            self.trace.lock().push(format!("before({})", self.tag));
            if self.fail_before {
                anyhow::bail!("listener {} misbehaved", self.tag);
            }
            Ok(())
        }

        async fn after_run(&self, _job: &str, _result: &JobResult) -> anyhow::Result<()> {
            self.trace.lock().push(format!("after({})", self.tag));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_onion_nesting() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = ListenerChain::new(
            vec![
                MappedListener::new(Arc::new(TracingListener::new("B", trace.clone())), 0),
                MappedListener::new(Arc::new(TracingListener::new("A", trace.clone())), -100),
            ],
            vec![],
        );

        let params = JobParams::new();
        chain.before_run("job", &params).await;
        trace.lock().push("body".to_string());
        chain.after_run("job", &JobResult::success("job")).await;

        assert_eq!(
            *trace.lock(),
            vec!["before(A)", "before(B)", "body", "after(B)", "after(A)"]
        );
    }

    #[tokio::test]
    async fn test_unordered_listeners_go_innermost_in_registration_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = ListenerChain::new(
            vec![MappedListener::new(
                Arc::new(TracingListener::new("outer", trace.clone())),
                LOG_LISTENER_ORDER,
            )],
            vec![
                Arc::new(TracingListener::new("bare1", trace.clone())),
                Arc::new(TracingListener::new("bare2", trace.clone())),
            ],
        );

        let params = JobParams::new();
        chain.before_run("job", &params).await;
        chain.after_run("job", &JobResult::success("job")).await;

        assert_eq!(
            *trace.lock(),
            vec![
                "before(outer)",
                "before(bare1)",
                "before(bare2)",
                "after(bare2)",
                "after(bare1)",
                "after(outer)"
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_stop_the_chain() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut failing = TracingListener::new("bad", trace.clone());
        failing.fail_before = true;

        let chain = ListenerChain::new(
            vec![
                MappedListener::new(Arc::new(failing), -10),
                MappedListener::new(Arc::new(TracingListener::new("good", trace.clone())), 10),
            ],
            vec![],
        );

        let params = JobParams::new();
        chain.before_run("job", &params).await;
        chain.after_run("job", &JobResult::success("job")).await;

        assert_eq!(
            *trace.lock(),
            vec!["before(bad)", "before(good)", "after(good)", "after(bad)"]
        );
    }
}
