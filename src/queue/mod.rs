mod dead_letter;

pub use dead_letter::DeadLetterManager;

use crate::job_store::{
    ExecutionLogEntry, Job, JobState, JobStore, QueueCounts, StorageError,
    CONFIG_KEY_MAX_RETRIES, DEFAULT_MAX_RETRIES,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that can occur on the producer surface.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Command must not be empty")]
    EmptyCommand,

    #[error("Job id already exists: {0}")]
    DuplicateJob(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Producer-side surface of the queue: enqueue new jobs and inspect
/// existing ones. Claiming and execution live in [`crate::worker`].
pub struct JobQueue {
    store: Arc<dyn JobStore>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Persist a new pending job, immediately eligible for claim.
    ///
    /// The id is generated when the caller does not supply one, and the
    /// retry budget falls back to the stored `max_retries` configuration.
    pub fn enqueue(
        &self,
        id: Option<String>,
        command: &str,
        max_retries: Option<i64>,
    ) -> Result<Job, QueueError> {
        if command.trim().is_empty() {
            return Err(QueueError::EmptyCommand);
        }

        let id = id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let max_retries = match max_retries {
            Some(value) => value,
            None => self
                .store
                .get_config_i64(CONFIG_KEY_MAX_RETRIES, DEFAULT_MAX_RETRIES)?,
        };

        let job = Job::new(id, command.to_string(), max_retries);
        match self.store.insert_job(&job) {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => return Err(QueueError::DuplicateJob(job.id)),
            Err(e) => return Err(e.into()),
        }

        info!(
            "Enqueued job {} with max_retries {}",
            job.id, job.max_retries
        );
        Ok(job)
    }

    pub fn job(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get_job(job_id)?)
    }

    pub fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.list_jobs(state, limit)?)
    }

    pub fn counts(&self) -> Result<QueueCounts, QueueError> {
        Ok(self.store.counts_by_state()?)
    }

    pub fn recent_logs(
        &self,
        job_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionLogEntry>, QueueError> {
        Ok(self.store.recent_logs(job_id, limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::SqliteJobStore;

    fn create_test_queue() -> JobQueue {
        JobQueue::new(Arc::new(SqliteJobStore::in_memory().unwrap()))
    }

    #[test]
    fn test_enqueue_generates_id_when_absent() {
        let queue = create_test_queue();

        let job = queue.enqueue(None, "echo hi", None).unwrap();
        assert_eq!(job.id.len(), 36);
        assert_eq!(job.state, JobState::Pending);
        assert!(queue.job(&job.id).unwrap().is_some());
    }

    #[test]
    fn test_enqueue_keeps_caller_id() {
        let queue = create_test_queue();

        let job = queue.enqueue(Some("my-job".to_string()), "true", None).unwrap();
        assert_eq!(job.id, "my-job");
    }

    #[test]
    fn test_enqueue_empty_id_is_replaced() {
        let queue = create_test_queue();

        let job = queue.enqueue(Some(String::new()), "true", None).unwrap();
        assert_eq!(job.id.len(), 36);
    }

    #[test]
    fn test_enqueue_rejects_blank_command() {
        let queue = create_test_queue();

        assert!(matches!(
            queue.enqueue(None, "", None),
            Err(QueueError::EmptyCommand)
        ));
        assert!(matches!(
            queue.enqueue(None, "   \t", None),
            Err(QueueError::EmptyCommand)
        ));
        assert!(queue.list(None, 100).unwrap().is_empty());
    }

    #[test]
    fn test_enqueue_rejects_duplicate_id() {
        let queue = create_test_queue();

        queue.enqueue(Some("dup".to_string()), "true", None).unwrap();
        let err = queue
            .enqueue(Some("dup".to_string()), "false", None)
            .unwrap_err();
        let QueueError::DuplicateJob(id) = err else {
            panic!("expected a duplicate error, got {:?}", err);
        };
        assert_eq!(id, "dup");
    }

    #[test]
    fn test_enqueue_default_retry_budget_from_config() {
        let queue = create_test_queue();

        let defaulted = queue.enqueue(None, "true", None).unwrap();
        assert_eq!(defaulted.max_retries, 3);

        let explicit = queue.enqueue(None, "true", Some(7)).unwrap();
        assert_eq!(explicit.max_retries, 7);
    }

    #[test]
    fn test_counts_and_list_filter() {
        let queue = create_test_queue();

        queue.enqueue(Some("a".to_string()), "true", None).unwrap();
        queue.enqueue(Some("b".to_string()), "true", None).unwrap();

        let counts = queue.counts().unwrap();
        assert_eq!(counts.pending, 2);

        let pending = queue.list(Some(JobState::Pending), 10).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(queue.list(Some(JobState::Dead), 10).unwrap().is_empty());
    }
}
