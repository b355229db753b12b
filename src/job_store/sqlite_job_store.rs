use super::models::{
    ClaimOutcome, ExecutionLogEntry, Job, JobState, LogStats, NewExecutionLog, QueueCounts,
    RetryDisposition, CONFIG_KEY_BACKOFF_BASE, CONFIG_KEY_MAX_RETRIES, DEFAULT_BACKOFF_BASE,
    DEFAULT_MAX_RETRIES,
};
use super::schema::QUEUE_VERSIONED_SCHEMAS;
use super::{BackoffPolicy, JobStore, StorageError};
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded wait for SQLite locks before an operation reports busy.
const LOCK_WAIT: Duration = Duration::from_secs(30);

/// The canonical store: one SQLite connection guarded by a mutex.
///
/// Worker loops coordinate through separate `SqliteJobStore` handles (one
/// connection each); SQLite's locking is the only cross-handle synchronization.
#[derive(Debug)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::open_with_lock_wait(db_path, LOCK_WAIT)
    }

    /// `open` with a caller-chosen bound on SQLite lock waits. Tests shrink
    /// the bound to exercise contention without the full `LOCK_WAIT`.
    pub(crate) fn open_with_lock_wait<P: AsRef<Path>>(
        db_path: P,
        lock_wait: Duration,
    ) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let conn = Connection::open(path).context("Failed to open queue database")?;
        conn.busy_timeout(lock_wait)
            .context("Failed to set busy timeout")?;

        let schema = QUEUE_VERSIONED_SCHEMAS.last().unwrap();
        if is_new_db {
            info!("Creating new queue database at {:?}", path);
            schema.create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;
            if db_version != schema.version as i64 {
                anyhow::bail!(
                    "Queue database version {} is not supported (expected {})",
                    db_version,
                    schema.version
                );
            }
            schema
                .validate(&conn)
                .context("Queue database schema validation failed")?;
        }

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store
            .seed_default_config()
            .context("Failed to seed default queue configuration")?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        QUEUE_VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.seed_default_config()?;
        Ok(store)
    }

    fn seed_default_config(&self) -> Result<(), StorageError> {
        self.set_config_if_absent(CONFIG_KEY_MAX_RETRIES, &DEFAULT_MAX_RETRIES.to_string())?;
        self.set_config_if_absent(CONFIG_KEY_BACKOFF_BASE, &DEFAULT_BACKOFF_BASE.to_string())?;
        debug!("Seeded default queue configuration");
        Ok(())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let state_str: String = row.get("state")?;
        let state = JobState::parse(&state_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown job state '{}'", state_str).into(),
            )
        })?;

        let created_at_str: String = row.get("created_at")?;
        let updated_at_str: String = row.get("updated_at")?;

        Ok(Job {
            id: row.get("id")?,
            command: row.get("command")?,
            state,
            attempts: row.get("attempts")?,
            max_retries: row.get("max_retries")?,
            run_after: row.get("run_after")?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            last_error: row.get("last_error")?,
        })
    }

    fn row_to_log_entry(row: &rusqlite::Row) -> rusqlite::Result<ExecutionLogEntry> {
        let created_at_str: String = row.get("created_at")?;

        Ok(ExecutionLogEntry {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            attempt: row.get("attempt")?,
            exit_code: row.get("exit_code")?,
            duration_ms: row.get("duration_ms")?,
            stdout: row.get("stdout")?,
            stderr: row.get("stderr")?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    /// The claim transaction. Opened in immediate mode so two concurrent
    /// claimers can never both select the same row; the conditional UPDATE
    /// is a second guard against a claimer that read the row before our
    /// lock was taken.
    fn try_claim(conn: &mut Connection) -> Result<ClaimOutcome, StorageError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        let job = tx
            .query_row(
                "SELECT id, command, state, attempts, max_retries, run_after, created_at, updated_at, last_error
                 FROM jobs WHERE state = ?1 AND run_after <= ?2
                 ORDER BY created_at ASC LIMIT 1",
                params![JobState::Pending.as_str(), now.timestamp()],
                Self::row_to_job,
            )
            .optional()?;

        let Some(job) = job else {
            return Ok(ClaimOutcome::NoEligibleJobs);
        };

        let updated = tx.execute(
            "UPDATE jobs SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state = ?4",
            params![
                JobState::Processing.as_str(),
                Self::format_datetime(&now),
                job.id,
                JobState::Pending.as_str()
            ],
        )?;
        if updated == 0 {
            // Someone else transitioned the row first; dropping the
            // transaction rolls back and the caller polls again later.
            return Ok(ClaimOutcome::Contended);
        }
        tx.commit()?;

        Ok(ClaimOutcome::Claimed(job))
    }
}

impl JobStore for SqliteJobStore {
    fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (id, command, state, attempts, max_retries, run_after, created_at, updated_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.command,
                job.state.as_str(),
                job.attempts,
                job.max_retries,
                job.run_after,
                Self::format_datetime(&job.created_at),
                Self::format_datetime(&job.updated_at),
                job.last_error
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, command, state, attempts, max_retries, run_after, created_at, updated_at, last_error
             FROM jobs WHERE id = ?1",
        )?;

        let job = stmt
            .query_row(params![job_id], Self::row_to_job)
            .optional()?;

        Ok(job)
    }

    fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let jobs = match state {
            Some(state) => {
                let mut stmt = conn.prepare(
                    "SELECT id, command, state, attempts, max_retries, run_after, created_at, updated_at, last_error
                     FROM jobs WHERE state = ?1 ORDER BY created_at ASC LIMIT ?2",
                )?;
                let jobs = stmt
                    .query_map(params![state.as_str(), limit as i64], Self::row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                jobs
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, command, state, attempts, max_retries, run_after, created_at, updated_at, last_error
                     FROM jobs ORDER BY created_at ASC LIMIT ?1",
                )?;
                let jobs = stmt
                    .query_map(params![limit as i64], Self::row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                jobs
            }
        };

        Ok(jobs)
    }

    fn counts_by_state(&self) -> Result<QueueCounts, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (state, count) = row?;
            match JobState::parse(&state) {
                Some(JobState::Pending) => counts.pending = count,
                Some(JobState::Processing) => counts.processing = count,
                Some(JobState::Completed) => counts.completed = count,
                Some(JobState::Dead) => counts.dead = count,
                None => warn!("Ignoring unknown job state '{}' in counts", state),
            }
        }
        Ok(counts)
    }

    fn claim_next(&self) -> Result<ClaimOutcome, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        match Self::try_claim(&mut conn) {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_busy() => {
                debug!("Claim lock wait expired, treating as contended");
                Ok(ClaimOutcome::Contended)
            }
            Err(e) => Err(e),
        }
    }

    fn mark_completed(&self, job_id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                JobState::Completed.as_str(),
                Self::format_datetime(&Utc::now()),
                job_id
            ],
        )?;
        Ok(())
    }

    fn fail_attempt(
        &self,
        job_id: &str,
        error_message: &str,
        policy: &BackoffPolicy,
    ) -> Result<RetryDisposition, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (attempts, max_retries): (i64, i64) = tx.query_row(
            "SELECT attempts, max_retries FROM jobs WHERE id = ?1",
            params![job_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let attempts = attempts + 1;
        let now = Utc::now();
        let updated_at = Self::format_datetime(&now);

        let disposition = if attempts > max_retries {
            tx.execute(
                "UPDATE jobs SET state = ?1, attempts = ?2, last_error = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    JobState::Dead.as_str(),
                    attempts,
                    error_message,
                    updated_at,
                    job_id
                ],
            )?;
            RetryDisposition::Dead
        } else {
            let run_after = policy.next_eligible_at(now.timestamp(), attempts);
            tx.execute(
                "UPDATE jobs SET state = ?1, attempts = ?2, run_after = ?3, last_error = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    JobState::Pending.as_str(),
                    attempts,
                    run_after,
                    error_message,
                    updated_at,
                    job_id
                ],
            )?;
            RetryDisposition::Retried { run_after }
        };
        tx.commit()?;

        Ok(disposition)
    }

    fn append_log(&self, entry: &NewExecutionLog) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO execution_logs (job_id, attempt, exit_code, duration_ms, stdout, stderr, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.job_id,
                entry.attempt,
                entry.exit_code,
                entry.duration_ms,
                entry.stdout,
                entry.stderr,
                Self::format_datetime(&Utc::now())
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent_logs(
        &self,
        job_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionLogEntry>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, attempt, exit_code, duration_ms, stdout, stderr, created_at
             FROM execution_logs WHERE job_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_log_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn aggregate_log_stats(&self) -> Result<LogStats, StorageError> {
        let conn = self.conn.lock().unwrap();
        let stats = conn.query_row(
            "SELECT COUNT(*), COALESCE(AVG(duration_ms), 0), COALESCE(SUM(exit_code != 0), 0)
             FROM execution_logs",
            [],
            |row| {
                Ok(LogStats {
                    total_runs: row.get(0)?,
                    avg_duration_ms: row.get(1)?,
                    failed_runs: row.get(2)?,
                })
            },
        )?;
        Ok(stats)
    }

    fn list_dead(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, command, state, attempts, max_retries, run_after, created_at, updated_at, last_error
             FROM jobs WHERE state = ?1 ORDER BY updated_at DESC LIMIT ?2",
        )?;

        let jobs = stmt
            .query_map(
                params![JobState::Dead.as_str(), limit as i64],
                Self::row_to_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    fn requeue(&self, job_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let updated = conn.execute(
            "UPDATE jobs SET state = ?1, attempts = 0, last_error = NULL, run_after = ?2, updated_at = ?3
             WHERE id = ?4 AND state = ?5",
            params![
                JobState::Pending.as_str(),
                now.timestamp(),
                Self::format_datetime(&now),
                job_id,
                JobState::Dead.as_str()
            ],
        )?;
        Ok(updated > 0)
    }

    fn get_config(&self, key: &str, default: &str) -> Result<String, StorageError> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    fn set_config_if_absent(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}
