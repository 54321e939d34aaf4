//! jobrig - entry point.
//!
//! Builds a scheduler with the bundled jobs and dispatches the CLI command
//! against it. Embedding applications use [`jobrig::JobRuntimeBuilder`]
//! directly and register their own jobs instead.

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;

use jobrig::cli::{self, Cli};
use jobrig::config::Config;
use jobrig::{Job, JobContext, JobMetadata, JobResult, JobRuntimeBuilder};

/// Bundled job: log a liveness line. Useful as a trigger smoke test.
struct HeartbeatJob;

#[async_trait]
impl Job for HeartbeatJob {
    fn metadata(&self) -> JobMetadata {
        JobMetadata::named("heartbeat")
    }

    async fn run(&self, _ctx: &JobContext) -> anyhow::Result<JobResult> {
        tracing::info!("heartbeat");
        Ok(JobResult::success("heartbeat"))
    }
}

/// Bundled job: prune files older than `retention_days` under `path`.
struct CleanupJob;

#[async_trait]
impl Job for CleanupJob {
    fn metadata(&self) -> JobMetadata {
        JobMetadata::named("cleanup")
            .param("retention_days", json!(30))
            .required_param("path")
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<JobResult> {
        let path = ctx
            .param("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("parameter 'path' is required"))?;
        let retention_days = ctx
            .param("retention_days")
            .and_then(|v| v.as_u64())
            .unwrap_or(30);

        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(retention_days * 24 * 60 * 60);
        let mut removed = 0usize;
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if ctx.is_cancelled() {
                return Ok(JobResult::cancelled("cleanup"));
            }
            let metadata = entry.metadata()?;
            if metadata.is_file() && metadata.modified()? < cutoff {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }

        Ok(JobResult::success("cleanup").message(format!("removed {} file(s)", removed)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = match &cli.config {
        Some(path) => Config::from_file(&path.to_string_lossy())?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: could not load config: {}. Using defaults.", e);
            Config::default()
        }),
    };

    jobrig::telemetry::init_logging(&config.logging)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting jobrig");

    let scheduler = JobRuntimeBuilder::new()
        .with_config(config)
        .job(HeartbeatJob)
        .job(CleanupJob)
        .in_memory_clustered_locks()
        .build()?;

    match cli::execute(cli.command, scheduler, cli.output).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            cli::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
