//! Shell command execution for claimed jobs.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Exit code reported when a command exceeds its time limit, matching
/// the convention of timeout(1).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Captured result of one command run.
///
/// Runner-level failures (spawn errors, timeouts) are folded into the
/// exit code and stderr rather than surfaced as errors, so the worker
/// loop can treat every run uniformly.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Trait for executing a job's command string.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`, optionally bounded by `timeout`. Never fails: any
    /// problem running the command is reported through the output.
    async fn run(&self, command: &str, timeout: Option<Duration>) -> CommandOutput;
}

/// Runs commands through `sh -c`.
pub struct ShellRunner;

impl ShellRunner {
    async fn run_once(command: &str) -> std::io::Result<CommandOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            // A None code means the process was killed by a signal.
            exit_code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> CommandOutput {
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, Self::run_once(command)).await {
                Ok(result) => result,
                Err(_) => {
                    debug!("Command timed out after {:?}: {}", limit, command);
                    return CommandOutput {
                        exit_code: TIMEOUT_EXIT_CODE,
                        stdout: String::new(),
                        stderr: format!("Command timed out after {}s", limit.as_secs()),
                    };
                }
            },
            None => Self::run_once(command).await,
        };

        match result {
            Ok(output) => output,
            Err(e) => CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("Failed to run command: {}", e),
            },
        }
    }
}
