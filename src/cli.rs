//! Command-line interface.
//!
//! Three subcommands drive the scheduler in-process: `exec` runs named jobs
//! once and exits nonzero unless every outcome is a success, `list` prints
//! the registered jobs, and `schedule` starts the configured triggers and
//! runs until interrupted.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::job::{JobOutcome, JobParams, JobResult};
use crate::scheduler::Scheduler;

/// Job runner and scheduler.
#[derive(Parser)]
#[command(
    name = "jobrig",
    version,
    about = "Run and schedule named jobs with per-job locking",
    propagate_version = true
)]
pub struct Cli {
    /// Path to a configuration file; falls back to JOBRIG_* env variables
    #[arg(short, long, global = true, env = "JOBRIG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one or more jobs to completion and report their outcomes
    Exec {
        /// Job to run; repeat the flag to run several
        #[arg(short, long = "job")]
        jobs: Vec<String>,

        /// Run the jobs one at a time instead of concurrently
        #[arg(long)]
        serial: bool,

        /// Parameter override as name=value, value parsed as JSON when
        /// possible; repeatable, applied to every job in this invocation
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Give up waiting on each job after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// List registered jobs
    List,

    /// Start configured triggers and run until interrupted
    Schedule,
}

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
}

/// Dispatch a parsed command against a built scheduler. Returns the process
/// exit code.
pub async fn execute(
    command: Commands,
    scheduler: Arc<Scheduler>,
    format: OutputFormat,
) -> Result<i32> {
    match command {
        Commands::Exec {
            jobs,
            serial,
            params,
            timeout_secs,
        } => exec(scheduler, jobs, serial, params, timeout_secs).await,
        Commands::List => {
            list(&scheduler, format)?;
            Ok(0)
        }
        Commands::Schedule => schedule(scheduler).await,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// exec
// ═══════════════════════════════════════════════════════════════════════════════

async fn exec(
    scheduler: Arc<Scheduler>,
    jobs: Vec<String>,
    serial: bool,
    params: Vec<String>,
    timeout_secs: Option<u64>,
) -> Result<i32> {
    if jobs.is_empty() {
        bail!("no jobs specified");
    }
    let overrides = parse_param_overrides(&params)?;

    let mut results = Vec::with_capacity(jobs.len());
    if serial {
        for name in &jobs {
            let future = scheduler
                .run_once_with_params(name, overrides.clone())
                .with_context(|| format!("cannot run job '{}'", name))?;
            results.push(await_result(&future, timeout_secs).await?);
        }
    } else {
        let futures = jobs
            .iter()
            .map(|name| {
                scheduler
                    .run_once_with_params(name, overrides.clone())
                    .with_context(|| format!("cannot run job '{}'", name))
            })
            .collect::<Result<Vec<_>>>()?;
        for future in &futures {
            results.push(await_result(future, timeout_secs).await?);
        }
    }

    let mut all_succeeded = true;
    for result in &results {
        print_result(result);
        all_succeeded &= result.outcome.is_success();
    }

    if all_succeeded {
        Ok(0)
    } else {
        print_error("one or more jobs did not succeed");
        Ok(1)
    }
}

async fn await_result(
    future: &crate::future::JobFuture,
    timeout_secs: Option<u64>,
) -> Result<JobResult> {
    match timeout_secs {
        Some(secs) => future
            .await_timeout(Duration::from_secs(secs))
            .await
            .map_err(|e| anyhow!(e)),
        None => Ok(future.await_result().await),
    }
}

/// Parse repeated `name=value` flags into a parameter map. Values parse as
/// JSON where possible, so `--param retries=3` yields a number while
/// `--param target=eu-west` stays a string.
fn parse_param_overrides(raw: &[String]) -> Result<JobParams> {
    let mut params = JobParams::new();
    for pair in raw {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid parameter '{}', expected name=value", pair))?;
        if name.is_empty() {
            bail!("invalid parameter '{}', expected name=value", pair);
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        params.insert(name.to_string(), value);
    }
    Ok(params)
}

fn print_result(result: &JobResult) {
    let outcome = result.outcome.to_string();
    let outcome = match result.outcome {
        JobOutcome::Success => outcome.green().bold(),
        JobOutcome::Warning => outcome.yellow().bold(),
        JobOutcome::Failure => outcome.red().bold(),
        JobOutcome::Skipped => outcome.cyan(),
        JobOutcome::Cancelled => outcome.magenta(),
        JobOutcome::Unknown => outcome.dimmed(),
    };
    match &result.message {
        Some(message) => println!("{}: {} ({})", result.job_name, outcome, message),
        None => println!("{}: {}", result.job_name, outcome),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// list
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Tabled, Serialize)]
struct JobRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "PARAMETERS")]
    parameters: String,
    #[tabled(rename = "DEPENDS ON")]
    depends_on: String,
    #[tabled(rename = "LOCK")]
    lock: String,
    #[tabled(rename = "TRIGGER")]
    trigger: String,
}

fn list(scheduler: &Arc<Scheduler>, format: OutputFormat) -> Result<()> {
    let registry = scheduler.registry();
    let mut rows = Vec::new();
    for name in registry.names() {
        let resolved = registry.resolve(&name)?;
        rows.push(JobRow {
            name,
            parameters: if resolved.params.is_empty() {
                "-".to_string()
            } else {
                let mut pairs: Vec<_> = resolved
                    .params
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                pairs.sort();
                pairs.join(", ")
            },
            depends_on: if resolved.depends_on.is_empty() {
                "-".to_string()
            } else {
                resolved.depends_on.join(", ")
            },
            lock: resolved.lock.to_string(),
            trigger: resolved
                .trigger
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
        });
    }

    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No jobs registered.".dimmed());
                return Ok(());
            }
            let table = Table::new(&rows)
                .with(Style::rounded())
                .with(Modify::new(Columns::first()).with(Alignment::left()))
                .to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// schedule
// ═══════════════════════════════════════════════════════════════════════════════

async fn schedule(scheduler: Arc<Scheduler>) -> Result<i32> {
    let started = scheduler.start_triggers()?;
    if started == 0 {
        print_info("no triggers configured; scheduler is idle");
    } else {
        print_info(&format!("started {} trigger(s)", started));
    }
    print_info("scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    print_info("shutting down");
    scheduler.shutdown_with_configured_grace().await;
    Ok(0)
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

/// Print an informational message to stdout.
pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}
