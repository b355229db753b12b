mod file_config;

pub use file_config::{FileConfig, WorkerConfig};

use crate::worker::WorkerSettings;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "queue.db";
pub const DEFAULT_WORKER_COUNT: usize = 1;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub worker_count: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub command_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub worker_count: usize,
    pub poll_interval_secs: u64,
    /// No limit when absent; runs can hang indefinitely.
    pub command_timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let worker_file = file.worker.unwrap_or_default();
        let worker_count = worker_file
            .count
            .or(cli.worker_count)
            .unwrap_or(DEFAULT_WORKER_COUNT);
        if worker_count == 0 {
            bail!("Worker count must be at least 1");
        }

        let poll_interval_secs = worker_file
            .poll_interval_secs
            .or(cli.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        let command_timeout_secs = worker_file
            .command_timeout_secs
            .or(cli.command_timeout_secs);

        Ok(Self {
            db_path,
            worker_count,
            poll_interval_secs,
            command_timeout_secs,
        })
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            command_timeout: self.command_timeout_secs.map(Duration::from_secs),
        }
    }
}
