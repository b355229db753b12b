mod backoff;
mod models;
mod schema;
mod sqlite_job_store;

pub use backoff::BackoffPolicy;
pub use models::*;
pub use schema::QUEUE_VERSIONED_SCHEMAS;
pub use sqlite_job_store::SqliteJobStore;

use rusqlite::ErrorCode;
use thiserror::Error;
use tracing::warn;

/// Storage-layer failure. The busy variant is transient (lock contention
/// within the bounded wait); everything else is a genuine fault that
/// callers must not swallow.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Queue database is busy: {0}")]
    Busy(#[source] rusqlite::Error),
    /// A write collided with an existing row (duplicate job id).
    #[error("Conflicting row: {0}")]
    Conflict(#[source] rusqlite::Error),
    #[error("Queue database error: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

impl StorageError {
    pub fn is_busy(&self) -> bool {
        matches!(self, StorageError::Busy(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StorageError::Busy(e),
                ErrorCode::ConstraintViolation => StorageError::Conflict(e),
                _ => StorageError::Sqlite(e),
            },
            _ => StorageError::Sqlite(e),
        }
    }
}

/// Transactional persistence for jobs, execution logs and configuration.
///
/// Every method is individually atomic: a crash mid-call never leaves a job
/// in an intermediate state, and no multi-step mutation is observable as
/// partially applied by a second caller.
pub trait JobStore: Send + Sync {
    fn insert_job(&self, job: &Job) -> Result<(), StorageError>;
    fn get_job(&self, job_id: &str) -> Result<Option<Job>, StorageError>;
    fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, StorageError>;
    fn counts_by_state(&self) -> Result<QueueCounts, StorageError>;

    /// Atomically select and transition the single oldest eligible pending
    /// job to `processing`. Losing a race or exhausting the bounded lock
    /// wait yields `ClaimOutcome::Contended`, never an error. The returned
    /// job carries the row contents as selected, before the transition.
    fn claim_next(&self) -> Result<ClaimOutcome, StorageError>;

    /// Unconditionally transition the job to `completed`.
    fn mark_completed(&self, job_id: &str) -> Result<(), StorageError>;

    /// Record a failed run in one transaction: increments `attempts`, then
    /// either parks the job in the dead-letter set (budget exhausted) or
    /// reschedules it to `pending` with `run_after` pushed out by the
    /// policy's delay. `error_message` is stored as `last_error` either way.
    fn fail_attempt(
        &self,
        job_id: &str,
        error_message: &str,
        policy: &BackoffPolicy,
    ) -> Result<RetryDisposition, StorageError>;

    fn append_log(&self, entry: &NewExecutionLog) -> Result<i64, StorageError>;
    fn recent_logs(
        &self,
        job_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionLogEntry>, StorageError>;
    fn aggregate_log_stats(&self) -> Result<LogStats, StorageError>;

    /// Dead jobs, most recently updated first.
    fn list_dead(&self, limit: usize) -> Result<Vec<Job>, StorageError>;

    /// Return a dead job to the queue: state back to `pending`, attempts
    /// reset to zero, `last_error` cleared and `run_after` set to now so it
    /// is immediately eligible. Returns false when the job does not exist
    /// or is not currently dead; nothing is mutated in that case.
    fn requeue(&self, job_id: &str) -> Result<bool, StorageError>;

    fn get_config(&self, key: &str, default: &str) -> Result<String, StorageError>;
    fn set_config_if_absent(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn get_config_i64(&self, key: &str, default: i64) -> Result<i64, StorageError> {
        let raw = self.get_config(key, &default.to_string())?;
        Ok(raw.parse().unwrap_or_else(|_| {
            warn!(
                "Config key {} holds non-numeric value '{}', using default {}",
                key, raw, default
            );
            default
        }))
    }

    fn get_config_f64(&self, key: &str, default: f64) -> Result<f64, StorageError> {
        let raw = self.get_config(key, &default.to_string())?;
        Ok(raw.parse().unwrap_or_else(|_| {
            warn!(
                "Config key {} holds non-numeric value '{}', using default {}",
                key, raw, default
            );
            default
        }))
    }
}
