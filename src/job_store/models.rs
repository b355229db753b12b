use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration keys recognized in the `config` table.
pub const CONFIG_KEY_MAX_RETRIES: &str = "max_retries";
pub const CONFIG_KEY_BACKOFF_BASE: &str = "backoff_base";

/// Default retry budget applied when a job is enqueued without one.
pub const DEFAULT_MAX_RETRIES: i64 = 3;
/// Default base of the exponential retry backoff.
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

/// Lifecycle state of a job.
///
/// There is no persisted "failed" state: a failed run either reschedules the
/// job back to `Pending` with a later `run_after`, or parks it in `Dead` once
/// the retry budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "dead" => Some(JobState::Dead),
            _ => None,
        }
    }
}

/// A unit of work: an opaque shell command plus its scheduling state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    /// Execution attempts made so far; never decreases except on requeue.
    pub attempts: i64,
    /// Attempts allowed beyond the first, fixed at enqueue time.
    pub max_retries: i64,
    /// Unix timestamp before which the job is not eligible for claim.
    /// Only meaningful while `state` is `Pending`.
    pub run_after: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Job {
    /// A freshly enqueued job: pending, zero attempts, eligible immediately.
    pub fn new(id: String, command: String, max_retries: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            command,
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            run_after: now.timestamp(),
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }
}

/// One row of the append-only execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: i64,
    pub job_id: String,
    /// Attempt number this run represents (first run is 1).
    pub attempt: i64,
    pub exit_code: i32,
    pub duration_ms: i64,
    pub stdout: String,
    pub stderr: String,
    pub created_at: DateTime<Utc>,
}

/// Fields of an execution log entry as produced by a worker, before the
/// store assigns the row id and timestamp.
#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub job_id: String,
    pub attempt: i64,
    pub exit_code: i32,
    pub duration_ms: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Result of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The caller now exclusively owns this job.
    Claimed(Job),
    /// No pending job with `run_after <= now` exists.
    NoEligibleJobs,
    /// Another claimer won the race, or the lock wait expired. The caller
    /// should treat this like an empty poll and try again next round.
    Contended,
}

/// Where a failed attempt left the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Rescheduled; eligible again at `run_after`.
    Retried { run_after: i64 },
    /// Retry budget exhausted; parked in the dead-letter set.
    Dead,
}

/// Per-state job counts. Every state is always present, zero when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub dead: i64,
}

/// Aggregates over the execution log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogStats {
    pub total_runs: i64,
    pub avg_duration_ms: f64,
    /// Runs that ended with a non-zero exit code.
    pub failed_runs: i64,
}

/// Operational snapshot combining log aggregates with the dead-letter count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub total_runs: i64,
    pub avg_duration_ms: f64,
    pub failed_runs: i64,
    pub dead_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_roundtrip() {
        for state in [
            JobState::Pending,
            JobState::Processing,
            JobState::Completed,
            JobState::Dead,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_job_state_parse_rejects_unknown() {
        assert_eq!(JobState::parse("failed"), None);
        assert_eq!(JobState::parse(""), None);
        assert_eq!(JobState::parse("PENDING"), None);
    }

    #[test]
    fn test_job_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobState::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(serde_json::to_string(&JobState::Dead).unwrap(), "\"dead\"");
    }
}
