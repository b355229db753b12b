use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use queuectl::config::{AppConfig, CliConfig, FileConfig};
use queuectl::job_store::{Job, JobState, SqliteJobStore};
use queuectl::queue::{DeadLetterManager, JobQueue};
use queuectl::worker::WorkerPool;

mod cli_style;
use cli_style::{get_styles, print_empty_list, print_key_value, print_success, TableBuilder};

fn parse_state(s: &str) -> Result<JobState, String> {
    JobState::parse(s).ok_or_else(|| format!("Unknown job state: {}", s))
}

#[derive(Parser)]
#[command(
    name = "queuectl",
    about = "Persistent shell-command work queue",
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH")),
    styles = get_styles()
)]
struct Cli {
    /// Path to the queue database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a shell command to the queue
    Enqueue {
        /// The shell command to run
        command: String,

        /// Explicit job id (a UUID is generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Retry budget for this job
        #[arg(long)]
        max_retries: Option<i64>,
    },

    /// List jobs, optionally filtered by state
    List {
        /// Only show jobs in this state
        #[arg(long, value_parser = parse_state)]
        state: Option<JobState>,

        /// Maximum number of jobs to show
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show job counts per state
    Status,

    /// Run a pool of workers until interrupted
    Worker {
        /// Number of concurrent workers
        #[arg(long)]
        count: Option<usize>,

        /// Seconds to sleep between claim attempts when the queue is empty
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Kill commands that run longer than this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List jobs in the dead-letter state
    Dead {
        /// Maximum number of jobs to show
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Move a dead job back to pending with a fresh retry budget
    Requeue {
        /// Id of the dead job
        job_id: String,
    },

    /// Show execution metrics aggregated from the run log
    Metrics {
        /// Print as JSON instead of key-value lines
        #[arg(long)]
        json: bool,
    },

    /// Show recent execution attempts for one job
    Logs {
        /// Id of the job
        job_id: String,

        /// Maximum number of attempts to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let cli = Cli::parse();

    let mut cli_config = CliConfig {
        db_path: cli.db.clone(),
        ..Default::default()
    };
    if let Command::Worker {
        count,
        poll_interval,
        timeout,
    } = &cli.command
    {
        cli_config.worker_count = *count;
        cli_config.poll_interval_secs = *poll_interval;
        cli_config.command_timeout_secs = *timeout;
    }

    let file_config = match &cli.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    match cli.command {
        Command::Enqueue {
            command,
            id,
            max_retries,
        } => {
            let queue = JobQueue::new(open_store(&config)?);
            let job = queue.enqueue(id, &command, max_retries)?;
            println!("{}", job.id);
        }
        Command::List { state, limit, json } => {
            let queue = JobQueue::new(open_store(&config)?);
            let jobs = queue.list(state, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                print_job_table(&jobs);
            }
        }
        Command::Status => {
            let queue = JobQueue::new(open_store(&config)?);
            let counts = queue.counts()?;
            println!();
            print_key_value("pending", &counts.pending.to_string());
            print_key_value("processing", &counts.processing.to_string());
            print_key_value("completed", &counts.completed.to_string());
            print_key_value("dead", &counts.dead.to_string());
            println!();
        }
        Command::Worker { .. } => {
            run_workers(&config).await?;
        }
        Command::Dead { limit, json } => {
            let manager = DeadLetterManager::new(open_store(&config)?);
            let jobs = manager.list_dead(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                print_dead_table(&jobs);
            }
        }
        Command::Requeue { job_id } => {
            let manager = DeadLetterManager::new(open_store(&config)?);
            if manager.requeue(&job_id)? {
                print_success(&format!("Job {} is pending again", job_id));
            } else {
                bail!("Job {} not found or not dead", job_id);
            }
        }
        Command::Metrics { json } => {
            let manager = DeadLetterManager::new(open_store(&config)?);
            let metrics = manager.metrics()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                println!();
                print_key_value("total runs", &metrics.total_runs.to_string());
                print_key_value("failed runs", &metrics.failed_runs.to_string());
                print_key_value(
                    "avg duration",
                    &format!("{:.1}ms", metrics.avg_duration_ms),
                );
                print_key_value("dead jobs", &metrics.dead_count.to_string());
                println!();
            }
        }
        Command::Logs { job_id, limit } => {
            let queue = JobQueue::new(open_store(&config)?);
            let entries = queue.recent_logs(&job_id, limit)?;
            if entries.is_empty() {
                print_empty_list(&format!("No recorded attempts for job {}", job_id));
            } else {
                for entry in entries {
                    println!(
                        "attempt {:>3}  exit {:>3}  {:>6}ms  {}",
                        entry.attempt,
                        entry.exit_code,
                        entry.duration_ms,
                        entry.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                    for line in entry.stdout.lines() {
                        println!("    out| {}", line);
                    }
                    for line in entry.stderr.lines() {
                        println!("    err| {}", line);
                    }
                }
            }
        }
    }

    Ok(())
}

fn open_store(config: &AppConfig) -> Result<Arc<SqliteJobStore>> {
    Ok(Arc::new(SqliteJobStore::open(&config.db_path)?))
}

async fn run_workers(config: &AppConfig) -> Result<()> {
    info!("Using queue database {:?}", config.db_path);

    // Open once before spawning so a bad path fails fast with a readable error.
    open_store(config)?;

    let pool = WorkerPool::new(config.db_path.clone(), config.worker_settings());
    let shutdown_token = tokio_util::sync::CancellationToken::new();

    let pool_run = pool.run(config.worker_count, shutdown_token.clone());
    tokio::pin!(pool_run);

    tokio::select! {
        result = &mut pool_run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            pool_run.await
        }
    }
}

fn print_job_table(jobs: &[Job]) {
    if jobs.is_empty() {
        print_empty_list("No jobs found");
        return;
    }
    let mut table = TableBuilder::new(vec!["ID", "STATE", "ATTEMPTS", "COMMAND", "UPDATED"]);
    for job in jobs {
        let attempts = job.attempts.to_string();
        let command = truncate(&job.command, 40);
        let updated = job.updated_at.format("%Y-%m-%d %H:%M:%S").to_string();
        table.add_row(vec![
            &job.id,
            job.state.as_str(),
            &attempts,
            &command,
            &updated,
        ]);
    }
    table.print();
}

fn print_dead_table(jobs: &[Job]) {
    if jobs.is_empty() {
        print_empty_list("No dead jobs");
        return;
    }
    let mut table = TableBuilder::new(vec!["ID", "ATTEMPTS", "LAST ERROR", "UPDATED"]);
    for job in jobs {
        let attempts = job.attempts.to_string();
        let error = truncate(job.last_error.as_deref().unwrap_or(""), 40);
        let updated = job.updated_at.format("%Y-%m-%d %H:%M:%S").to_string();
        table.add_row(vec![&job.id, &attempts, &error, &updated]);
    }
    table.print();
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
