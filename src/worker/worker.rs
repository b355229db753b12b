//! A single claim-execute-record loop.

use super::runner::{CommandOutput, CommandRunner};
use crate::job_store::{
    BackoffPolicy, ClaimOutcome, Job, JobStore, NewExecutionLog, RetryDisposition,
    CONFIG_KEY_BACKOFF_BASE, DEFAULT_BACKOFF_BASE,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tunables for a worker loop.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// How long to sleep when no job is claimable.
    pub poll_interval: Duration,
    /// Wall-clock limit for a single command run; `None` means unbounded.
    pub command_timeout: Option<Duration>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            command_timeout: None,
        }
    }
}

/// One cooperative unit of repeated work.
///
/// Runs in a loop until cancelled:
/// 1. Claim the oldest eligible pending job
/// 2. If nothing is claimable, sleep for the poll interval
/// 3. Run the job's command and append an execution log entry
/// 4. Mark the job completed, or record the failure for backoff
///
/// Cancellation is only observed between iterations: a job that has been
/// claimed always runs to completion before the loop exits.
pub struct Worker {
    id: usize,
    store: Arc<dyn JobStore>,
    runner: Arc<dyn CommandRunner>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        id: usize,
        store: Arc<dyn JobStore>,
        runner: Arc<dyn CommandRunner>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id,
            store,
            runner,
            settings,
        }
    }

    /// Main worker loop - call from a spawned task.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Worker {} starting (poll_interval={:?})",
            self.id, self.settings.poll_interval
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.store.claim_next() {
                Ok(ClaimOutcome::Claimed(job)) => {
                    self.execute(&job).await;
                    continue;
                }
                Ok(ClaimOutcome::NoEligibleJobs) => {}
                Ok(ClaimOutcome::Contended) => {
                    debug!("Worker {} lost a claim race", self.id);
                }
                Err(e) => {
                    error!("Worker {} failed to claim a job: {}", self.id, e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Worker {} stopped", self.id);
    }

    async fn execute(&self, job: &Job) {
        let attempt = job.attempts + 1;
        info!(
            "Worker {} running job {} (attempt {} of {})",
            self.id,
            job.id,
            attempt,
            job.max_retries + 1
        );

        let started = Instant::now();
        let output = self
            .runner
            .run(&job.command, self.settings.command_timeout)
            .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        if let Err(e) = self.store.append_log(&NewExecutionLog {
            job_id: job.id.clone(),
            attempt,
            exit_code: output.exit_code,
            duration_ms,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        }) {
            error!(
                "Worker {} failed to record execution of job {}: {}",
                self.id, job.id, e
            );
        }

        if output.exit_code == 0 {
            match self.store.mark_completed(&job.id) {
                Ok(()) => info!(
                    "Worker {} completed job {} in {}ms",
                    self.id, job.id, duration_ms
                ),
                Err(e) => error!(
                    "Worker {} failed to mark job {} completed: {}",
                    self.id, job.id, e
                ),
            }
            return;
        }

        let message = Self::error_message(&output);
        match self
            .store
            .fail_attempt(&job.id, &message, &self.backoff_policy())
        {
            Ok(RetryDisposition::Retried { run_after }) => warn!(
                "Worker {} job {} failed with exit code {} on attempt {}, retrying after {}",
                self.id, job.id, output.exit_code, attempt, run_after
            ),
            Ok(RetryDisposition::Dead) => warn!(
                "Worker {} job {} failed with exit code {} and exhausted its retry budget",
                self.id, job.id, output.exit_code
            ),
            Err(e) => error!(
                "Worker {} failed to record failure of job {}: {}",
                self.id, job.id, e
            ),
        }
    }

    /// Stderr wins over stdout when both carry text.
    fn error_message(output: &CommandOutput) -> String {
        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else {
            output.stdout.trim().to_string()
        }
    }

    fn backoff_policy(&self) -> BackoffPolicy {
        let base = match self
            .store
            .get_config_f64(CONFIG_KEY_BACKOFF_BASE, DEFAULT_BACKOFF_BASE)
        {
            Ok(base) => base,
            Err(e) => {
                warn!(
                    "Worker {} could not read backoff configuration: {}",
                    self.id, e
                );
                DEFAULT_BACKOFF_BASE
            }
        };
        BackoffPolicy::new(base)
    }
}
