//! Supervises a set of concurrent worker loops.

use super::runner::ShellRunner;
use super::worker::{Worker, WorkerSettings};
use crate::job_store::SqliteJobStore;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Spawns N independent workers against the same queue database.
///
/// Workers share no in-memory state: each one opens its own store
/// connection, and all coordination happens through the database's claim
/// transaction. The pool only distributes the shutdown token and waits
/// for every loop to finish.
pub struct WorkerPool {
    db_path: PathBuf,
    settings: WorkerSettings,
}

impl WorkerPool {
    pub fn new(db_path: PathBuf, settings: WorkerSettings) -> Self {
        Self { db_path, settings }
    }

    /// Run `count` workers until the token is cancelled and every worker
    /// has observed the cancellation and exited.
    pub async fn run(&self, count: usize, shutdown: CancellationToken) -> Result<()> {
        info!("Starting worker pool with {} workers", count);

        // Open every store before spawning anything: a failed open must not
        // leave earlier workers running unsupervised.
        let mut stores = Vec::with_capacity(count);
        for _ in 0..count {
            stores.push(Arc::new(SqliteJobStore::open(&self.db_path)?));
        }

        let mut handles = Vec::with_capacity(count);
        for (worker_id, store) in stores.into_iter().enumerate() {
            let worker = Worker::new(
                worker_id,
                store,
                Arc::new(ShellRunner),
                self.settings.clone(),
            );
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move { worker.run(token).await }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {}", e);
            }
        }

        info!("Worker pool stopped");
        Ok(())
    }
}
