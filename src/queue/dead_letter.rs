use crate::job_store::{Job, JobStore, QueueMetrics, StorageError};
use std::sync::Arc;
use tracing::{info, warn};

/// Administrative surface over jobs that exhausted their retry budget,
/// plus queue-wide execution metrics. Read-only except for [`requeue`].
///
/// [`requeue`]: DeadLetterManager::requeue
pub struct DeadLetterManager {
    store: Arc<dyn JobStore>,
}

impl DeadLetterManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Dead jobs, most recently updated first.
    pub fn list_dead(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        self.store.list_dead(limit)
    }

    /// Return a dead job to the queue with a fresh retry budget. False
    /// means the id is unknown or the job is not dead; nothing changes.
    pub fn requeue(&self, job_id: &str) -> Result<bool, StorageError> {
        let requeued = self.store.requeue(job_id)?;
        if requeued {
            info!("Requeued dead job {}", job_id);
        } else {
            warn!("Cannot requeue job {}: not found or not dead", job_id);
        }
        Ok(requeued)
    }

    pub fn metrics(&self) -> Result<QueueMetrics, StorageError> {
        let stats = self.store.aggregate_log_stats()?;
        let counts = self.store.counts_by_state()?;
        Ok(QueueMetrics {
            total_runs: stats.total_runs,
            avg_duration_ms: stats.avg_duration_ms,
            failed_runs: stats.failed_runs,
            dead_count: counts.dead,
        })
    }
}
